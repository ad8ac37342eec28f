//! Shipyard - Entry Point
//!
//! Deploys generated full-stack projects: compiles the backend, installs it on
//! the execution host, bundles the frontend and uploads its assets.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use shipyard::app::options::AppOptions;
use shipyard::app::run::{deploy_once, run};
use shipyard::filesys::dir::Dir;
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::models::deployment::{DeploymentRequest, ServerPair};
use shipyard::models::snapshot::DeploymentSnapshot;
use shipyard::storage::layout::StorageLayout;
use shipyard::storage::settings::Settings;
use shipyard::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);

    // Run the daemon
    if cli_args.contains_key("serve") {
        info!("Running shipyard daemon with options: {:?}", options.server);
        if let Err(e) = run(options, await_shutdown_signal()).await {
            error!("Failed to run the daemon: {e}");
            std::process::exit(1);
        }
        return;
    }

    // One-shot deployment
    let (Some(project), Some(source), Some(backend), Some(frontend)) = (
        cli_args.get("project"),
        cli_args.get("source"),
        cli_args.get("backend-target"),
        cli_args.get("frontend-target"),
    ) else {
        eprintln!(
            "Usage: shipyard --project=<id> --source=<dir> --backend-target=<id> \
             --frontend-target=<id> [--force] [--retry] [--settings=<path>]\n       \
             shipyard --serve [--settings=<path>]"
        );
        std::process::exit(2);
    };

    let snapshot = match DeploymentSnapshot::from_dir(&Dir::new(source)).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Unable to read sources from {}: {}", source, e);
            std::process::exit(1);
        }
    };

    let mut request = DeploymentRequest::new(project.clone(), snapshot, ServerPair::new(backend, frontend));
    request.force = cli_args.contains_key("force");

    match deploy_once(&options, request, cli_args.contains_key("retry")).await {
        Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to render outcome: {e}"),
        },
        Err(e) => {
            error!("Deployment failed: {e}");
            std::process::exit(1);
        }
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
                error!("Failed to install signal handlers, falling back to Ctrl+C");
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
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
