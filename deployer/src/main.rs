//! Ajime Deployer - Entry Point
//!
//! Finds the configured device types on the local network, ships the
//! service artifact to every device and starts the placement node the
//! service assigns to it.

use std::env;
use std::process;

use ajideploy::app::options::{parse_args, AppOptions, CliOptions};
use ajideploy::app::run::run;
use ajideploy::logs::{init_logging, LogOptions};
use ajideploy::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli_args = parse_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let cli = match CliOptions::from_args(&cli_args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // Retrieve the settings file
    let options = match AppOptions::load(&cli).await {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // Initialize logging; the structured file log only accompanies persisted
    // credentials
    let settings = &options.settings;
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: settings
            .credentials_file
            .as_ref()
            .map(|_| settings.log_dir.clone()),
    };
    let log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("Running Ajime Deployer {} ({})", version.version, version.git_hash);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Deployment aborted: {e}");
        drop(log_guard);
        process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
