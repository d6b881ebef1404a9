use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use orchard_core::core::supervisor::NodeSelection;
use orchard_core::{OrchardConfig, ParamFilter};
use std::path::PathBuf;

use orchard_manager::commands::{self, Session};

#[derive(Parser)]
#[command(name = "orchard")]
#[command(about = "ORCHARD - supervise and inspect node meshes")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to the standard search paths)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the meshes of a Meshfile
    Register {
        /// Meshfile (YAML or TOML)
        meshfile: PathBuf,
    },

    /// Start all nodes of MESH
    Start {
        mesh: String,
        /// Only these nodes
        #[arg(short = 's', long = "select")]
        select: Vec<String>,
        /// Skip these nodes
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
    },

    /// Stop all nodes of MESH
    Stop {
        mesh: String,
        /// Only these nodes
        #[arg(short = 's', long = "select")]
        select: Vec<String>,
        /// Skip these nodes
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
    },

    /// Show health of MESH
    Show { mesh: String },

    /// List parameters of running nodes
    Params {
        #[arg(long)]
        mesh: Option<String>,
        /// Owning node instance
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        param: Option<String>,
    },

    /// Publish a new value on a parameter topic
    SetParam {
        /// e.g. '!param:lab:scaler:ratio'
        topic: String,
        /// Value as JSON
        value: String,
    },

    /// Show the log of NODE in MESH
    Log { mesh: String, node: String },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .try_init();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = OrchardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let session = Session::open(config);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_command(&session, cli.command))
}

async fn run_command(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Register { meshfile } => {
            commands::register::register(session, &meshfile).await?;
        }
        Commands::Start {
            mesh,
            select,
            exclude,
        } => {
            let selection = NodeSelection { select, exclude };
            commands::lifecycle::start(session, &mesh, &selection).await?;
        }
        Commands::Stop {
            mesh,
            select,
            exclude,
        } => {
            let selection = NodeSelection { select, exclude };
            commands::lifecycle::stop(session, &mesh, &selection).await?;
        }
        Commands::Show { mesh } => commands::show::show(session, &mesh).await?,
        Commands::Params { mesh, name, param } => {
            let filter = ParamFilter { mesh, name, param };
            commands::params::show(session, &filter).await?;
        }
        Commands::SetParam { topic, value } => {
            commands::params::set(session, &topic, &value).await?;
        }
        Commands::Log { mesh, node } => commands::log::log(session, &mesh, &node).await?,
    }
    Ok(())
}
