//! Runs one role of a distributed training run, or a whole run in-process.

mod demo;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use demo::DemoFactory;
use mast::config::ConfigError;
use mast::control::{FileStore, MemoryStore, SharedStore, StoreError};
use mast::runtime::{ClusterError, ClusterLayout, ComponentFactory, LocalCluster};
use mast::{RoleError, RoleKind, RunConfig, RunOrchestrator, RunReport, TaskSpec};

#[derive(Parser, Debug)]
#[command(name = "mast-node", about = "Actor, trainer and evaluator roles over a shared store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play one role against a store directory shared with the other processes.
    Run {
        #[arg(long, env = "MAST_ROLE")]
        role: RoleKind,

        #[arg(long, env = "MAST_INDEX", default_value_t = 0)]
        index: u32,

        #[arg(long, env = "MAST_STORE_DIR")]
        store_dir: PathBuf,

        /// JSON run configuration. Defaults apply to anything it leaves out.
        #[arg(long, env = "MAST_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Run a trainer, actors and an evaluator as tasks of this process.
    Local {
        #[arg(long, env = "MAST_ACTORS", default_value_t = 2)]
        actors: u32,

        #[arg(long, env = "MAST_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Role(#[from] RoleError),
    #[error("{task}: {source}")]
    Cluster {
        task: TaskSpec,
        #[source]
        source: ClusterError,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mast=info,mast_node=info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn load_config(path: Option<&PathBuf>, factory: &DemoFactory) -> Result<RunConfig, ConfigError> {
    match path {
        Some(path) => RunConfig::from_json_file(path),
        None => Ok(factory.run_config()),
    }
}

fn log_report(report: &RunReport) {
    info!(
        task = %report.task,
        outcome = ?report.outcome,
        termination = ?report.termination.as_ref().map(|t| &t.reason),
        "role report"
    );
}

async fn run_role(
    role: RoleKind,
    index: u32,
    store_dir: PathBuf,
    config: Option<PathBuf>,
) -> Result<(), NodeError> {
    let factory = DemoFactory::default();
    let mut config = load_config(config.as_ref(), &factory)?;
    config.task = TaskSpec::new(role, index);

    let store: Arc<dyn SharedStore> =
        Arc::new(FileStore::open(store_dir)?.with_poll_interval(config.timing.store_poll()));
    let model = factory.model(&config.task)?;
    let env = match role {
        RoleKind::Trainer => None,
        RoleKind::Actor | RoleKind::Evaluator => Some(factory.environment(&config.task)?),
    };

    let report = RunOrchestrator::new(config, store, model, env)?.run().await?;
    log_report(&report);
    Ok(())
}

async fn run_local(actors: u32, config: Option<PathBuf>) -> Result<(), NodeError> {
    let factory = DemoFactory::default();
    let config = load_config(config.as_ref(), &factory)?;
    let layout = ClusterLayout {
        actors,
        ..ClusterLayout::default()
    };
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let cluster = LocalCluster::launch(&config, layout, store, &factory)?;
    info!(roles = cluster.handles().len(), "local cluster started");

    let mut failure = None;
    for (task, result) in cluster.join().await {
        match result {
            Ok(report) => log_report(&report),
            Err(source) => {
                error!(%task, error = %source, "role failed");
                if failure.is_none() {
                    failure = Some(NodeError::Cluster { task, source });
                }
            }
        }
    }
    failure.map_or(Ok(()), Err)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            role,
            index,
            store_dir,
            config,
        } => run_role(role, index, store_dir, config).await,
        Command::Local { actors, config } => run_local(actors, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}
