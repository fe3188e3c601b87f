//! Image versions parsed from the tag of an image reference.
//!
//! `repo:6.1.0` parses to a numeric version, `repo:latest` to a sentinel that
//! is newer than every numeric version, and the empty string to a sentinel
//! meaning "no version recorded yet". Missing trailing components compare as
//! zero, so `repo:6` and `repo:6.0.0.0` are the same version.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use crate::error::{Error, Result};

const LATEST_TAG: &str = "latest";

static NUMERIC_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").expect("static regex"));

#[derive(Debug, Clone)]
pub enum Version {
    /// No image has been recorded.
    Empty,
    Numeric(SmallVec<[u64; 4]>),
    Latest,
}

impl Version {
    /// Parse the tag of an image reference (`repo:tag`).
    pub fn parse(image: &str) -> Result<Self> {
        if image.is_empty() {
            return Ok(Version::Empty);
        }
        let err = |reason: &str| Error::VersionParse { image: image.to_string(), reason: reason.to_string() };
        let mut parts = image.split(':');
        let (_repo, tag) = match (parts.next(), parts.next(), parts.next()) {
            (Some(repo), Some(tag), None) => (repo, tag),
            (_, None, _) => return Err(err("missing tag")),
            _ => return Err(err("more than one ':' separator")),
        };
        if tag == LATEST_TAG {
            return Ok(Version::Latest);
        }
        if !NUMERIC_TAG.is_match(tag) {
            return Err(err("tag is neither numeric nor 'latest'"));
        }
        let mut components = SmallVec::new();
        for c in tag.split('.') {
            let n = c.parse::<u64>().map_err(|_| err("version component out of range"))?;
            components.push(n);
        }
        Ok(Version::Numeric(components))
    }

    pub fn is_empty(&self) -> bool { matches!(self, Version::Empty) }

    fn rank(&self) -> u8 {
        match self {
            Version::Empty => 0,
            Version::Numeric(_) => 1,
            Version::Latest => 2,
        }
    }
}

impl std::str::FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Version::parse(s) }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Version::Numeric(a), Version::Numeric(b)) => {
                let len = a.len().max(b.len());
                for i in 0..len {
                    let x = a.get(i).copied().unwrap_or(0);
                    let y = b.get(i).copied().unwrap_or(0);
                    match x.cmp(&y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                Ordering::Equal
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Empty => f.write_str("<empty>"),
            Version::Latest => f.write_str(LATEST_TAG),
            Version::Numeric(c) => {
                let parts: Vec<String> = c.iter().map(|n| n.to_string()).collect();
                f.write_str(&parts.join("."))
            }
        }
    }
}
