use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use k1max_ws_bridge::bridge_modules::bridge::Bridge;
use k1max_ws_bridge::bridge_modules::config::{load_options, DEFAULT_OPTIONS_PATH, OPTIONS_PATH_ENV};
use k1max_ws_bridge::bridge_modules::mqtt::RumqttPublisher;
use k1max_ws_bridge::bridge_modules::signals::ShutdownSignals;
use k1max_ws_bridge::bridge_modules::supervisor::Supervisor;
use k1max_ws_bridge::logging::init_logging;
use k1max_ws_bridge::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the WebSocket to MQTT bridge in the foreground
    Run {
        /// Path to the add-on options file
        #[arg(short, long, env = OPTIONS_PATH_ENV, default_value = DEFAULT_OPTIONS_PATH)]
        options: PathBuf,
        /// Also write JSON logs to a daily rotated file in this directory
        #[arg(long, env = "BRIDGE_LOG_DIR")]
        log_dir: Option<PathBuf>,
    },
    /// Validate the options, start the bridge as a child process and exit with its status
    Supervise {
        /// Path to the add-on options file
        #[arg(short, long, env = OPTIONS_PATH_ENV, default_value = DEFAULT_OPTIONS_PATH)]
        options: PathBuf,
    },
}

async fn run_bridge(
    options_path: &Path,
    log_dir: Option<&Path>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let _log_guard = init_logging(log_dir, None);
    info!(version = VERSION, "Starting bridge...");

    // wss:// needs a process-wide rustls provider. Ignore the error if one is already set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let options = match load_options(options_path) {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "Critical error loading options. Exiting.");
            return Err(e.into());
        }
    };

    let mut signals = ShutdownSignals::install()?;
    let publisher = Arc::new(RumqttPublisher::connect(&options.mqtt));
    let mut bridge = Bridge::new(&options, publisher.clone())?;

    tokio::select! {
        _ = bridge.run() => {}
        signal = signals.recv() => {
            info!(?signal, "Shutdown signal received. Stopping bridge.");
        }
    }

    publisher.shutdown().await;
    info!("Bridge stopped.");
    Ok(())
}

async fn supervise(options_path: &Path) -> Result<i32, Box<dyn Error + Send + Sync>> {
    // Options come first so that the supervisor logs at the configured level too.
    let options = load_options(options_path);
    let _log_guard = init_logging(
        None,
        options.as_ref().ok().and_then(|options| options.log_filter()),
    );
    info!(version = VERSION, options = ?options_path, "Starting supervisor...");

    let options = match options {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "Refusing to start the bridge.");
            return Err(e.into());
        }
    };
    let supervisor = Supervisor::for_options(options_path, &options)?;
    Ok(supervisor.run().await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Plain version output, checked before clap sees the arguments.
    if std::env::args().any(|arg| arg == "--version") {
        println!("k1max-ws-bridge version: {VERSION}");
        return Ok(());
    }

    match Args::parse().command {
        Commands::Run { options, log_dir } => run_bridge(&options, log_dir.as_deref()).await,
        Commands::Supervise { options } => {
            let code = supervise(&options).await?;
            std::process::exit(code);
        }
    }
}
