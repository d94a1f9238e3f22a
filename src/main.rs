mod config;
mod constants;
mod db;
mod error;
mod proxy;
mod settings;
mod supervisor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use supervisor::Supervisor;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

#[derive(Parser)]
#[command(name = "filewarden")]
#[command(version)]
#[command(about = "Supervises the filebrowser binary behind a hardening reverse proxy")]
struct Args {
    #[command(subcommand)]
    command: Cmd,

    /// Front the server with the hardening reverse proxy
    #[arg(short = 'P', long, env = "FILEWARDEN_PROXY")]
    proxy: bool,

    /// Extra overrides file (JSON or YAML) merged into the generated config
    #[arg(short = 'E', long, env = "FILEWARDEN_EXTRA")]
    extra: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the server as a regular process
    Start,
    /// Run as a service: a failing server is always restarted
    StartService,
    /// Run the containerized build of the server
    StartContainer,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let debug = std::env::var("DEBUG")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);
                tracing_subscriber::EnvFilter::new(if debug { "debug" } else { "info" })
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(
        "Starting filewarden v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );

    let supervisor = match Supervisor::new(args.proxy, args.extra) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Cmd::Start => supervisor.start().await,
        Cmd::StartService => supervisor.start_service().await,
        Cmd::StartContainer => supervisor.start_container(),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
