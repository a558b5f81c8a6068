use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use hospital_admin::config::{AppConfig, CliOverrides, DEFAULT_CONFIG_FILE};
use hospital_admin::telemetry;

mod cmd;

#[derive(Parser)]
#[command(name = "hospital-admin")]
#[command(version, about = "Hospital asset, repair and procurement administration server")]
pub struct Cli {
    /// Path to the TOML configuration file. Missing files mean defaults.
    #[arg(short, long, global = true, env = "HOSPITAL_ADMIN_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable permissive CORS for a local front-end
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations, then exit
    InitDb {
        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration as TOML
    Show,
    /// Validate the configuration file
    Validate,
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            let overrides = CliOverrides {
                host,
                port,
                db_path,
                dev_mode: dev,
            };
            let config = AppConfig::resolve(&cli.config, &overrides)?;
            telemetry::init(&config.logging);
            cmd::cmd_serve(config).await?;
        }
        Commands::InitDb { db_path } => {
            let overrides = CliOverrides {
                db_path,
                ..Default::default()
            };
            let config = AppConfig::resolve(&cli.config, &overrides)?;
            telemetry::init(&config.logging);
            cmd::cmd_init_db(&config)?;
        }
        Commands::Config { command } => {
            let effective = AppConfig::resolve(&cli.config, &CliOverrides::default());
            cmd::cmd_config(&cli.config, effective, command)?;
        }
    }

    Ok(())
}
