//! Foodlog Daemon (foodlogd)
//!
//! Samples the food hopper distance sensor once per poll interval, logs the
//! readings into hourly CSV partitions and serves a control socket for the
//! `foodlog` CLI.
//!
//! # Lifecycle
//! - Settings from `--config`, `$FOODLOG_CONFIG` or /etc/foodlog/settings.json
//! - The sampling loop starts at boot when `autostart` is set, and can be
//!   stopped and started again over the socket
//! - SIGINT/SIGTERM/SIGHUP stop the loop, wait for the tick in progress and
//!   remove the socket

mod sampler;
mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use fl_core::constants::paths;
use sampler::Sampler;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "FOODLOG_LOG";

// ============================================================================
// CLI
// ============================================================================

struct Args {
    config_path: PathBuf,
    socket_path: Option<PathBuf>,
    simulate_fallback: bool,
}

fn print_help() {
    eprintln!("foodlogd {} - Foodlog sampling daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    foodlogd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Settings file (default {}/{})", paths::CONFIG_DIR, paths::SETTINGS_FILE);
    eprintln!("    -s, --socket PATH   Socket path (overrides the settings file)");
    eprintln!("        --simulate      Use simulated readings if the IIO sensor is missing");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}     Settings file", paths::CONFIG_ENV);
    eprintln!("    {}        Log filter (trace, debug, info, warn, error)", LOG_ENV);
}

fn print_version() {
    println!("foodlogd {}", VERSION);
}

/// `None` when the process should exit successfully (help/version)
fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: paths::settings_path(),
        socket_path: None,
        simulate_fallback: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                print_version();
                return None;
            }
            "--simulate" => parsed.simulate_fallback = true,
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                parsed.config_path = PathBuf::from(&args[i]);
            }
            "-s" | "--socket" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --socket requires a path argument");
                    std::process::exit(1);
                }
                parsed.socket_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Some(parsed)
}

// ============================================================================
// Logging
// ============================================================================

/// journald when available, stdout otherwise. Returns true for journald.
fn init_logging(log_level: &str) -> bool {
    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

fn cleanup(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Some(a) => a,
        None => return Ok(()),
    };

    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    info!("STARTUP: foodlogd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    let settings = match fl_core::load_settings(&args.config_path).and_then(|s| s.validate().map(|_| s)) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid settings in {:?}: {}", args.config_path, e);
            std::process::exit(1);
        }
    };
    let socket_path = args.socket_path.clone().unwrap_or_else(|| settings.socket_path.clone());

    info!("STARTUP: Cage: {}", settings.cage_id);
    info!("STARTUP: Partitions: {:?}", settings.log_directory);
    info!("STARTUP: Poll interval: {:?}", settings.poll_interval());
    info!("STARTUP: Socket path: {:?}", socket_path);

    let sensor = match sampler::build_sensor(&settings.sensor, args.simulate_fallback) {
        Ok(s) => s,
        Err(e) => {
            error!("No range sensor: {} (use --simulate to run without hardware)", e);
            std::process::exit(1);
        }
    };

    let sampler = Arc::new(Sampler::from_settings(&settings, sensor));

    // Signal only; main waits for the in-flight tick and removes the socket
    let shutdown = Arc::new(Notify::new());
    let controller = sampler.controller().clone();
    let shutdown_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received termination signal - stopping sensor loop");
        controller.stop_sensor();
        shutdown_signal.notify_one();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    if settings.autostart {
        sampler.start()?;
    } else {
        info!("Autostart disabled - waiting for a start request");
    }

    let listener = match server::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            error!("Cannot bind {:?}: {}", socket_path, e);
            sampler.shutdown().await;
            std::process::exit(1);
        }
    };

    server::run_server(listener, sampler.clone(), shutdown).await;

    sampler.shutdown().await;
    cleanup(&socket_path);
    info!("SHUTDOWN: Daemon terminated");

    Ok(())
}
