use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use promtarget_apply::{spawn_worker, Outcome, Reconciler};
use promtarget_core::{ConfigId, ObjectRef, ScrapeConfig, ScrapeJob};
use promtarget_kubehub::{manifest::Manifests, KubeBackend};
use promtarget_store::MemoryStore;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "promtarget", version, about = "Publish ScrapeJob resources into Prometheus additional scrape configs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Only watch and list objects in this namespace (default: all)
    #[arg(long = "ns", global = true, env = "PROMTARGET_WATCH_NS")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch configs, Secrets and ScrapeJobs and keep every config reconciled
    Run {
        /// Delay before retrying a failed reconcile
        #[arg(long = "requeue-secs", env = "PROMTARGET_REQUEUE_SECS", default_value_t = 30)]
        requeue_secs: u64,
    },
    /// Reconcile a single config once, e.g. "monitoring/additional-scrape"
    Reconcile {
        config: String,
    },
    /// Render configs from local manifests without touching a cluster
    Render {
        /// File with AdditionalScrapeConfig manifests
        #[arg(long = "config")]
        config: PathBuf,
        /// Files with ScrapeJob manifests
        #[arg(long = "jobs")]
        jobs: Vec<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("PROMTARGET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PROMTARGET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid PROMTARGET_METRICS_ADDR; expected host:port");
        }
    }
}

fn queue_cap() -> usize {
    std::env::var("PROMTARGET_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1024)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { requeue_secs } => {
            let backend = Arc::new(KubeBackend::try_default(cli.namespace.clone()).await?);
            let client = backend.client().clone();
            let cap = queue_cap();
            info!(ns = ?cli.namespace, cap, requeue_secs, "starting controller");
            let (tx, worker) = spawn_worker(Reconciler::new(backend), cap, Duration::from_secs(requeue_secs));

            let mut watchers = tokio::spawn({
                let ns = cli.namespace.clone();
                async move {
                    if let Err(e) = promtarget_kubehub::run_watchers(client, ns, tx).await {
                        error!(error = ?e, "watchers failed");
                    }
                }
            });

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Ctrl-C received; shutting down");
                    watchers.abort();
                }
                _ = &mut watchers => warn!("watchers exited; shutting down"),
            }
            // watchers own the last trigger sender; once they are gone the worker drains and stops
            if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
                warn!("worker did not drain in time");
            }
        }
        Commands::Reconcile { config } => {
            let id: ConfigId = config.parse()?;
            let backend = Arc::new(KubeBackend::try_default(cli.namespace.clone()).await?);
            let outcome = Reconciler::new(backend).reconcile(&id).await?;
            print_outcome(cli.output, &outcome)?;
        }
        Commands::Render { config, jobs } => {
            let mut manifests = load(&config)?;
            for path in &jobs {
                manifests.extend(load(path)?);
            }
            render_offline(cli.output, manifests).await?;
        }
    }

    Ok(())
}

fn load(path: &PathBuf) -> Result<Manifests> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Manifests::parse(&text).with_context(|| format!("loading {}", path.display()))
}

fn print_outcome(output: Output, outcome: &Outcome) -> Result<()> {
    match output {
        Output::Human => {
            println!("config:    {}", outcome.config);
            println!("status:    {}", if outcome.status_written { "updated" } else { "unchanged" });
            let artifact = match outcome.artifact_write {
                Some(mode) => format!("{:?}", mode).to_lowercase(),
                None => "unchanged".to_string(),
            };
            println!("artifact:  {} ({} bytes)", artifact, outcome.payload_bytes);
            println!("discovered:");
            for name in &outcome.discovered {
                println!("  {}", name);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
    }
    Ok(())
}

async fn render_offline(output: Output, manifests: Manifests) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut configs: Vec<ScrapeConfig> = manifests.configs.iter().map(ScrapeConfig::from).collect();
    configs.sort_by(|a, b| a.id.cmp(&b.id));
    for job in &manifests.jobs {
        store.put_job(ScrapeJob::from(job)).await;
    }
    for cfg in &configs {
        store.put_config(cfg.clone()).await;
    }

    #[derive(serde::Serialize)]
    struct Rendered { config: ObjectRef, discovered: Vec<String>, document: String }

    let reconciler = Reconciler::new(store.clone());
    let mut rendered = Vec::with_capacity(configs.len());
    for cfg in &configs {
        let outcome = reconciler.reconcile(&cfg.id).await?;
        let document = store
            .artifact(&cfg.artifact.secret)
            .await
            .and_then(|a| a.value(&cfg.artifact.key).map(|v| String::from_utf8_lossy(v).into_owned()))
            .unwrap_or_default();
        rendered.push(Rendered { config: cfg.id.clone(), discovered: outcome.discovered, document });
    }

    match output {
        Output::Human => {
            for r in &rendered {
                println!("# {} ({} jobs)", r.config, r.discovered.len());
                print!("{}", r.document);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rendered)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_takes_repeated_jobs() {
        let cli = Cli::try_parse_from(["promtarget", "-o", "json", "render", "--config", "c.yaml", "--jobs", "a.yaml", "--jobs", "b.yaml"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Render { config, jobs } => {
                assert_eq!(config, PathBuf::from("c.yaml"));
                assert_eq!(jobs, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reconcile_takes_positional_ref() {
        let cli = Cli::try_parse_from(["promtarget", "reconcile", "monitoring/additional"]).unwrap();
        assert!(matches!(cli.command, Commands::Reconcile { ref config } if config == "monitoring/additional"));
    }
}
