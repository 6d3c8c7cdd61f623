use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod simulate;
pub mod version;

#[derive(Parser)]
#[command(name = "biodedup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Privacy-preserving biometric deduplication node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the node configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run an in-process federation over the simulated transport
    Simulate {
        /// Path to config file (default: ~/.config/biodedup/config.toml if present)
        #[arg(long)]
        config: Option<String>,

        /// Number of peer shards
        #[arg(long, default_value_t = 3)]
        shards: usize,

        /// Number of enrolled subjects, spread across the peers
        #[arg(long, default_value_t = 10)]
        subjects: usize,

        /// Independent per-request failure probability
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Output path (default: ~/.config/biodedup/config.toml)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Config {
            action: ConfigAction::Init { path, force },
        } => {
            let path = path
                .map(PathBuf::from)
                .unwrap_or_else(config::default_config_path);
            config::init(&path, force)
        }
        Commands::Simulate {
            config,
            shards,
            subjects,
            failure_rate,
        } => {
            let file_config = config::resolve(config.as_deref())?;
            init_logging(&file_config.logging.level);
            simulate::execute(file_config.node, shards, subjects, failure_rate).await
        }
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

/// Install the stderr subscriber; `RUST_LOG` overrides the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed (tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
