//! ssl-ingress - ingress and TLS certificate connector

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ssl_ingress::cluster::{ClusterClient, KubectlClient};
use ssl_ingress::config::ConnectorConfig;
use ssl_ingress::identity::Identity;
use ssl_ingress::machine::CertificateRequestStateMachine;
use ssl_ingress::relation::{FileRelation, SslTerminationRelation};
use ssl_ingress::scheduler::EventScheduler;
use ssl_ingress::store::{FileStore, IdentityStore};

/// ssl-ingress - expose workloads through an ingress node port and request
/// a TLS certificate for them from an ssl-termination proxy
#[derive(Parser, Debug)]
#[command(name = "ssl-ingress", version, about, long_about = None)]
struct Cli {
    /// Path to the persisted state file
    #[arg(long, env = "SSL_INGRESS_STATE", default_value = "ssl-ingress-state.json")]
    state: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every handler whose trigger holds, once
    Dispatch(DispatchArgs),

    /// Print the workload status and the per-identity submission errors
    Status,

    /// Print the deployment identity
    Identity(IdentityArgs),
}

/// Deployment identity overrides
#[derive(Args, Debug)]
struct IdentityArgs {
    /// Path to the connector configuration file
    #[arg(short = 'f', long = "config")]
    config: PathBuf,

    /// Model UUID, overriding `model-uuid` from the config file
    #[arg(long, env = "JUJU_MODEL_UUID")]
    model_uuid: Option<String>,

    /// Unit name, overriding `unit-name` from the config file
    #[arg(long, env = "JUJU_UNIT_NAME")]
    unit_name: Option<String>,
}

/// Dispatch arguments
#[derive(Args, Debug)]
struct DispatchArgs {
    #[command(flatten)]
    identity: IdentityArgs,

    /// Directory exchanging ssl-termination relation data
    ///
    /// The relation is considered unavailable when not given.
    #[arg(long)]
    relation_dir: Option<PathBuf>,

    /// Artifact root; installation is triggered once it is known
    #[arg(long, env = "SSL_INGRESS_DEPLOYER_PATH")]
    deployer_path: Option<PathBuf>,

    /// Label key used to record resource ownership
    #[arg(long)]
    selector: Option<String>,

    /// kubeconfig passed to kubectl
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let kv = Arc::new(FileStore::open(&cli.state)?);
    let store = IdentityStore::new(kv);

    match cli.command {
        Commands::Dispatch(args) => run_dispatch(args, store),
        Commands::Status => print_status(&store),
        Commands::Identity(args) => print_identity(&args, &store),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ssl_ingress=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn load_config(args: &IdentityArgs) -> anyhow::Result<ConnectorConfig> {
    let mut config = ConnectorConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(model_uuid) = &args.model_uuid {
        config.model_uuid = model_uuid.clone();
    }
    if let Some(unit_name) = &args.unit_name {
        config.unit_name = unit_name.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Run one scheduler pass
fn run_dispatch(args: DispatchArgs, store: IdentityStore) -> anyhow::Result<()> {
    let config = load_config(&args.identity)?;

    if let Some(path) = &args.deployer_path {
        store.set_deployer_path(path)?;
    }
    if let Some(selector) = &args.selector {
        store.set_selector(selector)?;
    }

    let mut kubectl = KubectlClient::new();
    if let Some(kubeconfig) = &args.kubeconfig {
        kubectl = kubectl.with_kubeconfig(kubeconfig);
    }
    let cluster: Arc<dyn ClusterClient> = Arc::new(kubectl);

    let relation = args.relation_dir.as_deref().map(FileRelation::new);
    let machine = CertificateRequestStateMachine::new(config, store.clone(), cluster)?;
    let scheduler = EventScheduler::new(machine, store.clone());

    let relation_status = match &relation {
        Some(relation) => relation.status_digest()?,
        None => None,
    };
    let triggers = scheduler.triggers(relation_status)?;
    info!(?triggers, "dispatching");

    let report = scheduler.dispatch(
        &triggers,
        relation.as_ref().map(|r| r as &dyn SslTerminationRelation),
    )?;
    for (handler, outcome) in report {
        println!("{handler}: {outcome}");
    }
    Ok(())
}

fn print_status(store: &IdentityStore) -> anyhow::Result<()> {
    match store.workload_status()? {
        Some(status) => println!("{status}"),
        None => println!("unknown"),
    }
    println!("state: {}", store.markers()?.state);
    for (identity, error) in store.error_states()? {
        println!("{identity}: {error}");
    }
    Ok(())
}

fn print_identity(args: &IdentityArgs, store: &IdentityStore) -> anyhow::Result<()> {
    let identity = match store.identity()? {
        Some(identity) => identity,
        None => {
            let config = load_config(args)?;
            Identity::derive(&config.model_uuid, config.application())
        }
    };
    println!("{identity}");
    Ok(())
}
