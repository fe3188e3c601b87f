//! Exact arithmetic over Kubernetes quantity strings.
//!
//! `k8s_openapi`'s `Quantity` is an opaque string; storage sizes of colocated
//! services have to be summed without floating point drift, so values are
//! held as an `i128` count of nano-units.

use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::{Error, Result};

const NANOS: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [(&str, u32); 6] = [("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
const DECIMAL_SUFFIXES: [(&str, i32); 9] =
    [("n", -9), ("u", -6), ("m", -3), ("k", 3), ("M", 6), ("G", 9), ("T", 12), ("P", 15), ("E", 18)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ExactQuantity {
    nanos: i128,
    /// Whether the value came from a binary-suffixed input (`Gi`, `Mi`, ...).
    binary: bool,
}

impl ExactQuantity {
    pub const ZERO: ExactQuantity = ExactQuantity { nanos: 0, binary: false };

    /// Whole units (bytes for memory and storage), rounded toward zero.
    pub fn units(&self) -> i128 { self.nanos / NANOS }

    pub fn from_units(units: i128, binary: bool) -> Self { Self { nanos: units * NANOS, binary } }

    pub fn is_zero(&self) -> bool { self.nanos == 0 }

    pub fn is_positive(&self) -> bool { self.nanos > 0 }

    pub fn is_negative(&self) -> bool { self.nanos < 0 }

    pub fn parse(raw: &str) -> Result<Self> {
        let err = |reason: &str| Error::Quantity { value: raw.to_string(), reason: reason.to_string() };
        let s = raw.trim();
        if s.is_empty() {
            return Err(err("empty"));
        }
        let (negative, s) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let num_end = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
        let (number, suffix) = s.split_at(num_end);
        if number.is_empty() || number == "." {
            return Err(err("missing number"));
        }
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if frac_part.contains('.') {
            return Err(err("more than one decimal point"));
        }
        let int_val: i128 = if int_part.is_empty() { 0 } else { int_part.parse().map_err(|_| err("number out of range"))? };
        let mut frac_digits = frac_part.trim_end_matches('0').to_string();
        if frac_digits.len() > 9 {
            return Err(err("precision finer than nano-units"));
        }
        while frac_digits.len() < 9 {
            frac_digits.push('0');
        }
        let frac_val: i128 = frac_digits.parse().map_err(|_| err("invalid fraction"))?;
        let mut nanos = int_val.checked_mul(NANOS).and_then(|v| v.checked_add(frac_val)).ok_or_else(|| err("number out of range"))?;

        let mut binary = false;
        if suffix.is_empty() {
            // plain number
        } else if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
            binary = true;
            nanos = nanos.checked_mul(1i128 << (10 * power)).ok_or_else(|| err("number out of range"))?;
        } else {
            let exponent = if let Some((_, e)) = DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
                *e
            } else if let Some(exp) = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E')) {
                exp.parse::<i32>().map_err(|_| err("unknown suffix"))?
            } else {
                return Err(err("unknown suffix"));
            };
            nanos = scale_pow10(nanos, exponent).ok_or_else(|| err("value not representable exactly"))?;
        }
        Ok(Self { nanos: if negative { -nanos } else { nanos }, binary })
    }

    pub fn from_k8s(q: &Quantity) -> Result<Self> { Self::parse(&q.0) }

    pub fn to_k8s(&self) -> Quantity { Quantity(self.to_string()) }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        let binary = (self.binary && !self.is_zero()) || (other.binary && !other.is_zero());
        self.nanos.checked_add(other.nanos).map(|nanos| Self { nanos, binary })
    }

    /// Exact sum; `None` when the iterator is empty.
    pub fn sum<I: IntoIterator<Item = ExactQuantity>>(items: I) -> Option<Result<Self>> {
        let mut iter = items.into_iter();
        let first = iter.next()?;
        let mut acc = first;
        for q in iter {
            acc = match acc.checked_add(q) {
                Some(v) => v,
                None => return Some(Err(Error::Quantity { value: format!("{} + {}", acc, q), reason: "overflow".into() })),
            };
        }
        Some(Ok(acc))
    }
}

fn scale_pow10(nanos: i128, exponent: i32) -> Option<i128> {
    if exponent >= 0 {
        let factor = 10i128.checked_pow(exponent as u32)?;
        nanos.checked_mul(factor)
    } else {
        let divisor = 10i128.checked_pow(exponent.unsigned_abs())?;
        if nanos % divisor != 0 {
            return None;
        }
        Some(nanos / divisor)
    }
}

impl fmt::Display for ExactQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        if self.nanos % NANOS == 0 {
            let units = self.nanos / NANOS;
            if self.binary {
                for (sfx, power) in BINARY_SUFFIXES.iter().rev() {
                    let base = 1i128 << (10 * power);
                    if units % base == 0 {
                        return write!(f, "{}{}", units / base, sfx);
                    }
                }
            }
            for (sfx, e) in DECIMAL_SUFFIXES.iter().rev().filter(|(_, e)| *e > 0) {
                let base = 10i128.pow(*e as u32);
                if units % base == 0 {
                    return write!(f, "{}{}", units / base, sfx);
                }
            }
            return write!(f, "{}", units);
        }
        if self.nanos % 1_000_000 == 0 {
            write!(f, "{}m", self.nanos / 1_000_000)
        } else if self.nanos % 1_000 == 0 {
            write!(f, "{}u", self.nanos / 1_000)
        } else {
            write!(f, "{}n", self.nanos)
        }
    }
}

impl std::str::FromStr for ExactQuantity {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}
