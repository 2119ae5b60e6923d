//! bayd — the Baygrid daemon.
//!
//! Runs the bay reconciler against a stack service and the local state
//! store, and offers a few offline commands for operators.
//!
//! # Usage
//!
//! ```text
//! bayd --config /etc/baygrid/baygrid.toml serve
//! bayd --config baygrid.toml check-config
//! bayd render --baymodel baymodel.toml --bay bay.toml
//! bayd list-bays --status CREATE_IN_PROGRESS --limit 20
//! ```

mod admin;
mod serve;

use std::path::PathBuf;

use bay_core::ConductorConfig;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,bayd=debug,bay=debug";

#[derive(Parser)]
#[command(name = "bayd", about = "Baygrid bay provisioning daemon")]
struct Cli {
    /// Configuration file. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler until interrupted.
    Serve {
        /// Stack service to drive.
        #[arg(long, value_enum, default_value = "heat")]
        backend: Backend,

        /// Override `conductor.periodic_interval` (e.g. "10s").
        #[arg(long)]
        interval: Option<String>,
    },

    /// Validate the configuration and print it with defaults filled in.
    CheckConfig,

    /// Render the stack definition for a baymodel and bay without submitting it.
    Render {
        /// Baymodel spec (TOML).
        #[arg(long)]
        baymodel: PathBuf,

        /// Bay spec (TOML). Defaults to one master and one node.
        #[arg(long)]
        bay: Option<PathBuf>,

        /// Bay UUID to render for. A random one is used when omitted.
        #[arg(long)]
        uuid: Option<String>,

        /// Include the template body in the output.
        #[arg(long)]
        show_template: bool,
    },

    /// List bays in the state store.
    ListBays {
        /// Only bays in this status (repeatable).
        #[arg(long)]
        status: Vec<String>,

        /// Only bays created from this baymodel UUID.
        #[arg(long)]
        baymodel: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// UUID of the last bay of the previous page.
        #[arg(long)]
        marker: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Heat-style HTTP API at `heat.endpoint`.
    Heat,
    /// In-process backend; every operation completes at once.
    Memory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { backend, interval } => serve::run(config, backend, interval).await,
        Command::CheckConfig => admin::check_config(&config),
        Command::Render {
            baymodel,
            bay,
            uuid,
            show_template,
        } => admin::render(&config, &baymodel, bay.as_deref(), uuid, show_template),
        Command::ListBays {
            status,
            baymodel,
            limit,
            marker,
            json,
        } => admin::list_bays(&config, &status, baymodel, limit, marker.as_deref(), json),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ConductorConfig> {
    match path {
        Some(path) => ConductorConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display())),
        None => Ok(ConductorConfig::default()),
    }
}
