//! TarangHub - hub daemon for battery-powered wireless peripherals
//!
//! Talks to nRF24-linked devices (lamp controller, weather node) over a
//! UART radio bridge and republishes their state to local TCP clients as
//! newline-delimited JSON on port 10101.

use std::env;
use std::path::Path;
use tarang_hub::app::HubApp;
use tarang_hub::{HubConfig, Result};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `tarang-hub <path>` (positional)
/// - `tarang-hub --config <path>` (flag-based)
/// - `tarang-hub -c <path>` (short flag)
///
/// Defaults to `/etc/taranghub.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/taranghub.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = if Path::new(&config_path).exists() {
        HubConfig::from_file(&config_path)?
    } else {
        eprintln!("Config {} not found, using defaults", config_path);
        HubConfig::hub_defaults()
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("TarangHub v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);

    let mut app = HubApp::new(config)?;
    app.run()
}
