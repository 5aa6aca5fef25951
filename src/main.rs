use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rtc_bridge::config::AppConfig;

/// rtc-bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtc-bridge")]
#[command(version, about = "Bridges browser WebRTC video sources to per-client network video streams", long_about = None)]
struct CliArgs {
    /// Path to the JSON settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling router
    Router {
        /// Listen address (overrides settings)
        #[arg(short = 'a', long, value_name = "ADDRESS")]
        listen: Option<String>,
    },
    /// Run the media adapter
    Adapter {
        /// Signaling router WebSocket URL (overrides settings)
        #[arg(short = 'u', long, value_name = "URL")]
        signaling_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting rtc-bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Router { listen } => {
            if let Some(listen) = listen {
                config.router.bind_addr = listen;
            }
            tokio::select! {
                result = rtc_bridge::router::run(&config.router) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
        Command::Adapter { signaling_url } => {
            if let Some(url) = signaling_url {
                config.adapter.signaling_url = url;
            }
            tokio::select! {
                result = rtc_bridge::adapter::run(&config.adapter) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
