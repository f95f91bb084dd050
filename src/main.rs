#![cfg(not(tarpaulin_include))]

use option_downloads::AppConfig;
use option_downloads::app;
use std::env;

/// Main entry point for the download server
///
/// Reads an optional config file path from the command line (defaulting to
/// `config.toml`), an optional bind address after it, sets up logging and
/// runs the web server.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");
    let mut config = AppConfig::load(config_path)?;

    if let Some(bind_address) = args.get(2) {
        config.bind_address = bind_address.clone();
    }

    log::info!(
        "Starting download server on {} (database {})",
        config.bind_address,
        config.database_path
    );
    app::run(config).await
}
