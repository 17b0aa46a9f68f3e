//! Main application entry point for the presence relay.
//!
//! Loads configuration, installs logging, starts the relay and waits for a
//! shutdown signal.

mod cli;
mod config;
mod logging;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use presence_server::RelayServer;
use signals::setup_signal_handlers;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Environment variable that overrides the bind port.
const PORT_ENV: &str = "PORT";

/// Main application struct.
pub struct Application {
    config: AppConfig,
    server: Arc<RelayServer>,
}

impl Application {
    /// Builds the application: configuration file, then CLI and environment
    /// overrides, then logging.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Some(num_pointers) = args.num_pointers {
            config.relay.num_pointers = num_pointers;
        }

        config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref())?;

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        logging::setup_logging(&config.logging)?;
        display_banner();

        let server = Arc::new(RelayServer::new(config.to_server_config()?));
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server })
    }

    /// Runs the relay until a shutdown signal arrives or the server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max slots: {}", self.config.relay.max_slots);
        match self.config.relay.num_pointers {
            0 => info!("  🖱️ Pointer pool: disabled (identity = slot)"),
            n => info!("  🖱️ Pointer pool: {}", n),
        }
        info!(
            "  ⏱️ Heartbeat {}ms | sweep {}ms | idle timeout {}s",
            self.config.relay.heartbeat_interval_ms,
            self.config.relay.sweep_interval_ms,
            self.config.relay.idle_timeout_ms / 1000
        );

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let monitoring_handle = {
            let connection_manager = self.server.get_connection_manager();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                interval.tick().await;

                loop {
                    interval.tick().await;
                    let slots = connection_manager.slots_in_use().await;
                    match connection_manager.pointers_in_use().await {
                        Some(pointers) => info!(
                            "📊 {} connection(s) | {} slot(s) | {} pointer(s) in use",
                            connection_manager.connection_count(),
                            slots,
                            pointers
                        ),
                        None => info!(
                            "📊 {} connection(s) | {} slot(s) in use",
                            connection_manager.connection_count(),
                            slots
                        ),
                    }
                }
            })
        };

        info!("✅ Presence relay is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let outcome: Result<(), Box<dyn std::error::Error>> = tokio::select! {
            result = &mut server_handle => {
                // The server only returns on its own when startup failed
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                }
            }
            signal = setup_signal_handlers() => {
                signal?;
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
                self.server.shutdown().await?;
                match tokio::time::timeout(Duration::from_secs(5), &mut server_handle).await {
                    Ok(Ok(Ok(()))) => info!("✅ Server stopped cleanly"),
                    Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
                    Ok(Err(e)) => error!("❌ Server task failed: {}", e),
                    Err(_) => {
                        error!("⏳ Server did not stop in time, aborting");
                        server_handle.abort();
                    }
                }
                Ok(())
            }
        };

        monitoring_handle.abort();
        info!("👋 Presence relay shutdown complete");
        outcome
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Startup banner.
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║             PRESENCE RELAY               ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  Binary rosters · pointer relay          ║");
    info!("║  Heartbeat latency · idle eviction       ║");
    info!("╚══════════════════════════════════════════╝");
}
