use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tarn_core::{ChildSpec, ConditionType, Platform, PlatformSpec, PlatformStatus, Version};
use tarn_engine::config::{ENV_LOG, ENV_METRICS_ADDR};
use tarn_engine::{load_platform, load_status, Engine, EngineConfig, ObservedObjects, TickInput};
use tarn_health::{tracked_keys, HealthMonitor};
use tarn_render::{render_all, Manifest, RenderContext, StructuralRenderer};

#[derive(Parser, Debug)]
#[command(name = "tarnctl", version, about = "Tarn platform reconciliation CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan the topology for a platform manifest
    Plan {
        /// Platform manifest (YAML)
        #[arg(long = "platform")]
        platform: PathBuf,
        /// Persisted status (YAML); defaults to the manifest's status block
        #[arg(long = "status")]
        status: Option<PathBuf>,
        /// Print rendered Kubernetes objects instead of child specs
        #[arg(long = "render", action = ArgAction::SetTrue)]
        render: bool,
    },
    /// Run one reconciliation tick
    Tick {
        #[arg(long = "platform")]
        platform: PathBuf,
        #[arg(long = "status")]
        status: Option<PathBuf>,
        /// Observed child objects (multi-document YAML)
        #[arg(long = "observed")]
        observed: Option<PathBuf>,
        /// Tick time in epoch milliseconds (default: now)
        #[arg(long = "now-millis")]
        now_millis: Option<i64>,
        #[arg(long = "render", action = ArgAction::SetTrue)]
        render: bool,
    },
    /// Classify platform health from a router address
    Health {
        /// Router base URL, e.g. http://localhost:11015
        #[arg(long = "router", env = "TARN_ROUTER_URL")]
        router: String,
        /// Platform manifest used to pick the tracked services
        #[arg(long = "platform")]
        platform: Option<PathBuf>,
    },
    /// Parse image versions and compare them
    Version {
        /// Image references, e.g. gcr.io/cdap/sandbox:6.10.0
        #[arg(required = true)]
        images: Vec<String>,
    },
}

/// Filter from `TARN_LOG`; unset or unparsable directives fall back to `info`.
fn log_filter(raw: Option<String>) -> EnvFilter {
    raw.and_then(|s| EnvFilter::try_new(s.trim()).ok()).unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_tracing() {
    let filter = log_filter(std::env::var(ENV_LOG).ok());
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn metrics_listener(raw: Option<String>) -> Option<SocketAddr> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!(key = ENV_METRICS_ADDR, value = %raw, "expected host:port; metrics export disabled");
            None
        }
    }
}

fn init_metrics() {
    let Some(addr) = metrics_listener(std::env::var(ENV_METRICS_ADDR).ok()) else { return };
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!(error = %e, "failed to install metrics exporter");
        return;
    }
    describe_counter!("reconcile_total", "Reconciliation ticks run");
    describe_counter!("reconcile_err", "Reconciliation ticks that failed");
    describe_counter!("upgrade_transition_total", "Version phase transitions");
    describe_counter!("upgrade_failed_total", "Upgrade jobs that exhausted their retries");
    describe_counter!("health_check_total", "Health checks run");
    describe_histogram!("health_check_ms", Unit::Milliseconds, "Health check latency");
    info!(%addr, "serving Prometheus metrics");
}

fn read(path: &Path) -> Result<String> { std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())) }

fn emit<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml | Output::Human => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn print_children(children: &[ChildSpec]) {
    for c in children {
        let detail = match c {
            ChildSpec::Stateful(g) | ChildSpec::Stateless(g) => {
                let services: Vec<&str> = g.services.iter().map(|s| s.name()).collect();
                let storage = g.storage.as_ref().map(|s| format!(" storage={}", s.size.0)).unwrap_or_default();
                format!("replicas={} services={}{}", g.replicas, services.join(","), storage)
            }
            ChildSpec::Network(n) => format!("{} {} -> {}", n.service_type, n.port, n.target),
            ChildSpec::Job(_) => String::new(),
            ChildSpec::Config(c) => format!("keys={}", c.data.len()),
        };
        println!("{:<24} {:<40} {}", c.template_id(), c.name(), detail);
    }
}

fn print_manifests(manifests: &[Manifest]) {
    for m in manifests {
        println!("{:<12} {}", m.kind(), m.name());
    }
}

fn print_status(status: &PlatformStatus) {
    println!("image:    {}", if status.image_to_use.is_empty() { "<unset>" } else { status.image_to_use.as_str() });
    println!("ui image: {}", if status.user_interface_image_to_use.is_empty() { "<unset>" } else { status.user_interface_image_to_use.as_str() });
    println!("phase:    {:?}", status.conditions.phase());
    if let Some(h) = status.conditions.health() {
        println!("health:   {}", h);
    }
    for c in status.conditions.iter().filter(|c| c.is_true()) {
        println!("  {:<20} {} {}", c.type_.as_str(), c.reason, c.message);
    }
}

fn load_inputs(cfg: &EngineConfig, platform: &Path, status: Option<&Path>) -> Result<(Platform, PlatformStatus)> {
    let p = load_platform(&read(platform)?, &cfg.limits).context("loading platform")?;
    let s = match status {
        Some(path) => load_status(&read(path)?, &cfg.limits).context("loading status")?,
        None => p.status.clone().unwrap_or_default(),
    };
    Ok((p, s))
}

fn render(engine: &Engine, platform: &Platform, children: &[ChildSpec]) -> Result<Vec<Manifest>> {
    let naming = engine.naming(platform)?;
    let ctx = RenderContext::for_platform(platform, &naming);
    Ok(render_all(&StructuralRenderer, &ctx, children)?)
}

#[derive(Serialize)]
struct TickReport<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    status: &'a PlatformStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    children: Option<&'a [ChildSpec]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifests: Option<&'a [Manifest]>,
}

fn now_from(millis: Option<i64>) -> Result<DateTime<Utc>> {
    match millis {
        Some(ms) => Utc.timestamp_millis_opt(ms).single().ok_or_else(|| anyhow!("invalid --now-millis {}", ms)),
        None => Ok(Utc::now()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = EngineConfig::from_env();

    match cli.command {
        Commands::Plan { platform, status, render: want_render } => {
            let engine = Engine::new(cfg.clone())?;
            let (p, mut s) = load_inputs(&cfg, &platform, status.as_deref())?;
            if !s.versions_initialized() {
                info!("status has no applied versions; planning with the desired images");
                s.image_to_use = p.spec.image.clone();
                s.user_interface_image_to_use = p.spec.user_interface_image.clone();
            }
            let naming = engine.naming(&p)?;
            let children = engine.planner().plan(&p, &naming, &s).context("planning")?;
            info!(instance = %naming.instance, children = children.len(), "planned");
            if want_render {
                let manifests = render(&engine, &p, &children)?;
                match cli.output {
                    Output::Human => print_manifests(&manifests),
                    out => emit(out, &manifests)?,
                }
            } else {
                match cli.output {
                    Output::Human => print_children(&children),
                    out => emit(out, &children)?,
                }
            }
        }
        Commands::Tick { platform, status, observed, now_millis, render: want_render } => {
            let engine = Engine::new(cfg.clone())?;
            let (p, s) = load_inputs(&cfg, &platform, status.as_deref())?;
            let observed = match observed {
                Some(path) => ObservedObjects::from_yaml(&read(&path)?, &cfg.limits).context("loading observed objects")?,
                None => ObservedObjects::new(),
            };
            let now = now_from(now_millis)?;
            match engine.reconcile(TickInput { platform: &p, status: s, observed: &observed, now }).await {
                Ok(outcome) => {
                    let manifests = if want_render { Some(render(&engine, &p, &outcome.children)?) } else { None };
                    match cli.output {
                        Output::Human => {
                            print_status(&outcome.status);
                            match &manifests {
                                Some(m) => print_manifests(m),
                                None => print_children(&outcome.children),
                            }
                        }
                        out => emit(
                            out,
                            &TickReport {
                                ok: true,
                                error: None,
                                status: &outcome.status,
                                children: manifests.is_none().then_some(outcome.children.as_slice()),
                                manifests: manifests.as_deref(),
                            },
                        )?,
                    }
                }
                Err(failure) => {
                    error!(error = %failure.error, "tick failed");
                    match cli.output {
                        Output::Human => print_status(&failure.status),
                        out => emit(
                            out,
                            &TickReport { ok: false, error: Some(failure.error.to_string()), status: &failure.status, children: None, manifests: None },
                        )?,
                    }
                    return Err(failure.into());
                }
            }
        }
        Commands::Health { router, platform } => {
            let spec = match platform {
                Some(path) => load_platform(&read(&path)?, &cfg.limits).context("loading platform")?.spec,
                None => PlatformSpec::default(),
            };
            let tracked = tracked_keys(&spec);
            let monitor = HealthMonitor::http(cfg.health_timeout)?;
            let outcome = monitor.check(&router, &tracked).await;
            match cli.output {
                Output::Human => println!("{}", outcome),
                out => emit(out, &serde_json::json!({ "router": router, "health": outcome.as_str() }))?,
            }
            if outcome != ConditionType::Ready {
                warn!(router = %router, health = %outcome, "platform not ready");
            }
        }
        Commands::Version { images } => {
            let mut parsed = Vec::with_capacity(images.len());
            for image in &images {
                parsed.push(Version::parse(image).with_context(|| format!("parsing {}", image))?);
            }
            let rows: Vec<serde_json::Value> =
                images.iter().zip(&parsed).map(|(i, v)| serde_json::json!({ "image": i, "version": v.to_string() })).collect();
            match cli.output {
                Output::Human => {
                    for w in images.iter().zip(&parsed).collect::<Vec<_>>().windows(2) {
                        let ((a, va), (b, vb)) = (w[0], w[1]);
                        let op = match va.cmp(vb) {
                            std::cmp::Ordering::Less => "<",
                            std::cmp::Ordering::Equal => "==",
                            std::cmp::Ordering::Greater => ">",
                        };
                        println!("{} {} {}", a, op, b);
                    }
                    if parsed.len() == 1 {
                        println!("{} -> {}", images[0], parsed[0]);
                    }
                }
                out => emit(out, &rows)?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::Naming;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tarnctl", "-o", "json", "tick", "--platform", "p.yaml", "--now-millis", "5"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Tick { now_millis: Some(5), .. }));
        let cli = Cli::try_parse_from(["tarnctl", "version", "repo:6.0", "repo:latest"]).unwrap();
        assert!(matches!(cli.command, Commands::Version { ref images } if images.len() == 2));
        assert!(Cli::try_parse_from(["tarnctl", "version"]).is_err());
    }

    #[test]
    fn log_filter_falls_back_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some(" tarn_engine=debug ".into())).to_string(), "tarn_engine=debug");
    }

    #[test]
    fn metrics_listener_needs_host_and_port() {
        assert_eq!(metrics_listener(Some("127.0.0.1:9000".into())), Some(SocketAddr::from(([127, 0, 0, 1], 9000))));
        assert_eq!(metrics_listener(Some("localhost".into())), None);
        assert_eq!(metrics_listener(None), None);
    }

    #[test]
    fn tick_time_from_millis() {
        assert_eq!(now_from(Some(1_500)).unwrap().timestamp_millis(), 1_500);
    }

    #[test]
    fn naming_matches_engine_defaults() {
        let p = Platform::new("demo", PlatformSpec::default());
        let n = Naming::for_platform(&p, &EngineConfig::default().resource_prefix).unwrap();
        assert_eq!(n.object_name("router"), "cdap-demo-router");
    }
}
