//! Cluster Deployer - Entry Point
//!
//! Provisions and tears down container clusters on behalf of users and
//! serves a small JSON API over the deployment registry.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use cluster_deployer::app::options::AppOptions;
use cluster_deployer::app::run::run;
use cluster_deployer::filesys::file::File;
use cluster_deployer::logs::{init_logging, LogOptions};
use cluster_deployer::storage::layout::StorageLayout;
use cluster_deployer::storage::settings::Settings;
use cluster_deployer::utils::version_info;

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
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file; a missing file means defaults
    let mut layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return;
            }
        }
    } else {
        Settings::default()
    };
    if let Err(e) = settings.validate() {
        eprintln!("Invalid settings file: {}", e);
        return;
    }
    if let (Some(files_path), false) = (&settings.files_path, cli_args.contains_key("base-dir")) {
        layout = StorageLayout::new(files_path);
    }

    // Initialize logging
    let logs_dir = layout.logs_dir();
    let log_dir = if settings.log_to_file {
        match logs_dir.create().await {
            Ok(()) => Some(logs_dir.path().to_path_buf()),
            Err(e) => {
                eprintln!("Unable to create log directory: {e}");
                None
            }
        }
    } else {
        None
    };
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir,
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from_settings(&settings, layout);

    info!("Running cluster deployer {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the deployer: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
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
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
