use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use droplet_operator::{controller, Droplet, ReconcileConfig, Settings, Step};
use droplet_store::MemoryStore;
use droplet_syncer::RecordingSink;
use kube::CustomResourceExt;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dropletctl", version, about = "Droplet operator")]
struct Cli {
    /// Output format for printed objects
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Only watch this namespace (default: all namespaces)
        #[arg(long = "ns", env = "DROPLET_WATCH_NAMESPACE")]
        namespace: Option<String>,
        /// Also run the per-tag database upgrade job
        #[arg(long = "upgrade-jobs", env = "DROPLET_UPGRADE_JOBS")]
        upgrade_jobs: Option<bool>,
    },
    /// Print the Droplet CustomResourceDefinition
    Crd,
    /// Print the child objects a droplet manifest reconciles to, without a cluster
    Render {
        /// Droplet manifest (YAML or JSON)
        file: PathBuf,
        /// Namespace used when the manifest has none
        #[arg(long = "ns", default_value = "default")]
        namespace: String,
        /// Include the database upgrade job
        #[arg(long = "upgrade-jobs")]
        upgrade_jobs: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("DROPLET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DROPLET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid DROPLET_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_objects(steps: &[Step], output: Output) -> Result<()> {
    match output {
        Output::Json => {
            let objects: Vec<&serde_json::Value> = steps.iter().map(|s| &s.object).collect();
            println!("{}", serde_json::to_string_pretty(&objects)?);
        }
        Output::Yaml => {
            for s in steps {
                print!("---\n{}", serde_yaml::to_string(&s.object)?);
            }
        }
    }
    Ok(())
}

async fn render(file: PathBuf, namespace: String, upgrade_jobs: bool, output: Output) -> Result<()> {
    let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let mut droplet: Droplet = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    droplet.metadata.namespace.get_or_insert(namespace);
    // Owner references need a uid; the API server assigns the real one.
    droplet.metadata.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());

    let store = MemoryStore::new();
    let events = RecordingSink::new();
    let cfg = ReconcileConfig { upgrade_jobs, ..Settings::from_env().reconcile_config() };
    let steps = droplet_operator::reconcile(&store, &events, &cfg, &droplet).await?;
    for e in events.events() {
        info!(reason = %e.reason, "{}", e.message);
    }
    print_objects(&steps, output)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { namespace, upgrade_jobs } => {
            let mut settings = Settings::from_env();
            settings.namespace = namespace.filter(|s| !s.is_empty());
            if let Some(on) = upgrade_jobs {
                settings.upgrade_jobs = on;
            }
            let client = droplet_kubehub::client().await?;
            controller::run(client, settings).await?;
        }
        Commands::Crd => match cli.output {
            Output::Yaml => print!("{}", serde_yaml::to_string(&Droplet::crd())?),
            Output::Json => println!("{}", serde_json::to_string_pretty(&Droplet::crd())?),
        },
        Commands::Render { file, namespace, upgrade_jobs } => render(file, namespace, upgrade_jobs, cli.output).await?,
    }
    Ok(())
}
