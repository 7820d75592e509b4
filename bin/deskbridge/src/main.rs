mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deskbridge")]
#[command(about = "Remote-driven embedded browser automation for desktop hosts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run the server hub (control channel + tool surface)
    Hub {
        /// Port to listen on (overrides config hub.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config hub.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Run a desktop runtime client against a hub
    Runtime {
        /// Hub channel URL (overrides config channel.url)
        #[arg(long)]
        url: Option<String>,

        /// Stable client id for this desktop instance
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Show hub status and connected instances
    Status {
        /// Hub base URL (default http://127.0.0.1:8799)
        #[arg(long)]
        hub_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Hub { port, host } => {
            commands::hub_cmd::run(host, port).await?;
        }
        Commands::Runtime { url, client_id } => {
            commands::runtime_cmd::run(url, client_id).await?;
        }
        Commands::Status { hub_url } => {
            commands::status_cmd::run(hub_url).await?;
        }
    }

    Ok(())
}
