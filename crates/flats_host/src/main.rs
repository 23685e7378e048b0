//! Development host for the Flats plugin.
//!
//! Runs a dispatch core on a fixed tick interval, enables the plugin from a
//! data directory, optionally replays a scripted session, and shuts down
//! cleanly on SIGINT/SIGTERM.

mod cli;
mod config;
mod gateway;
mod logging;
mod session;
mod signals;

use anyhow::{anyhow, Result};
use cli::CliArgs;
use config::AppConfig;
use flats_core::{Core, TickLoop};
use flats_plugin::FlatsPlugin;
use gateway::ConsoleHost;
use session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

// ============================================================================
// Application
// ============================================================================

struct Application {
    config: AppConfig,
    config_path: PathBuf,
}

impl Application {
    async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        info!("🔧 Logging initialized with level: {}", config.logging.level);

        Ok(Self {
            config,
            config_path: args.config_path,
        })
    }

    async fn run(self) -> Result<()> {
        let data_dir = self.config.data_dir();
        info!("🚀 Flats host v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Data: {}",
            self.config_path.display(),
            data_dir.display()
        );
        info!(
            "  ⏱️ {}ms per tick, {}ms budget",
            self.config.server.tick_interval_ms, self.config.server.tick_budget_ms
        );

        tokio::fs::create_dir_all(&data_dir).await?;
        let session = match &self.config.server.session_script {
            Some(path) => Some(Session::load(&PathBuf::from(path)).await?),
            None => None,
        };

        let core = Arc::new(Core::new(&self.config.core_config()));
        let host = Arc::new(ConsoleHost::new(core.store().clone()));
        let plugin = FlatsPlugin::enable(&core, &data_dir, host).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(
            TickLoop::new(core.clone(), self.config.tick_interval()).run(shutdown_rx.clone()),
        );
        if let Some(session) = session {
            tokio::spawn(session.run(
                core.clone(),
                plugin.context().clone(),
                self.config.tick_interval(),
                shutdown_rx,
            ));
        }

        signals::wait_for_shutdown().await?;
        info!("🛑 Shutting down");
        shutdown_tx.send(true)?;
        let ticks = ticker.await?;
        info!("⏱️ Ran {} ticks", ticks);

        let disabled = plugin.disable(&core);
        core.shutdown();
        disabled?;
        info!("✅ Shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Host error: {:#}", e);
        std::process::exit(1);
    }
}
