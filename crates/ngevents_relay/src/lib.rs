//! # ngevents relay
//!
//! Shares [`ngevents`] emitters between processes over WebSocket.
//!
//! ## Quick Start
//!
//! ```bash
//! # Expose the demo services (heartBeat, clock)
//! ngevents-relay serve
//!
//! # Mirror them from another process and log what arrives
//! ngevents-relay connect --url ws://127.0.0.1:12345
//!
//! # Custom configuration and JSON logs
//! ngevents-relay --config production.toml --json-logs serve --bind 0.0.0.0:12345
//! ```
//!
//! ## Configuration
//!
//! Settings are read from a TOML file (default: `relay.toml`). If the file
//! doesn't exist, a default configuration is created.
//!
//! ## Threading
//!
//! Emitters are single-threaded, so the relay runs on a current-thread
//! runtime inside a `LocalSet`; connections are spawned with `spawn_local`.

use tracing::error;

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod logging;
pub mod services;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Parses the command line, sets up logging and runs the relay.
///
/// Must be polled inside a `tokio::task::LocalSet`.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file before the full load and validation
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use bridge::{run_bridge, BridgeSummary};
pub use config::{ClientSettings, LoggingSettings, ServerSettings, ServiceSettings, ServiceSource};
pub use services::{HostedService, ServiceHost};
