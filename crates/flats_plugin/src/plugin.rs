//! Enabling and disabling the plugin on a running core.

use crate::cache::FlatsCache;
use crate::commands::{self, ROOT};
use crate::context::{self, FlatsContext};
use crate::error::PluginResult;
use crate::host::HostGateway;
use crate::listeners;
use crate::schedulers::{stop_all_delays, AutoSaveScheduler};
use crate::settings::{Settings, SETTINGS_FILE};
use crate::storage::{FlatsStorage, JsonFlatsStorage};
use flats_core::{CommandOutput, CommandResult, Core, SubscriptionId};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// The Flats plugin while it is enabled.
#[derive(Debug)]
pub struct FlatsPlugin {
    ctx: Arc<FlatsContext>,
    storage: Arc<JsonFlatsStorage>,
    auto_save: AutoSaveScheduler,
    subscriptions: Vec<SubscriptionId>,
}

impl FlatsPlugin {
    /// Loads settings and flats from `data_dir` and hooks the plugin into `core`.
    pub async fn enable(core: &Core, data_dir: &Path, host: Arc<dyn HostGateway>) -> PluginResult<Self> {
        info!("🔧 Enabling flats from {}", data_dir.display());
        let settings = Settings::load_from_file(&data_dir.join(SETTINGS_FILE)).await?;
        let storage = Arc::new(JsonFlatsStorage::new(data_dir));
        let mut cache = FlatsCache::new();
        cache.load_all(storage.load_all().await?);
        Self::start(core, settings, cache, storage, host)
    }

    /// Hooks the plugin into `core` with already loaded settings and flats.
    pub fn start(
        core: &Core,
        settings: Settings,
        cache: FlatsCache,
        storage: Arc<JsonFlatsStorage>,
        host: Arc<dyn HostGateway>,
    ) -> PluginResult<Self> {
        let ctx = Arc::new(FlatsContext::new(settings, cache, host));
        context::register_validators(core.store());
        let subscriptions = listeners::register(core.router(), &ctx);
        commands::register(core.commands(), &ctx);

        let auto_save = AutoSaveScheduler::new();
        let backend: Arc<dyn FlatsStorage> = storage.clone();
        auto_save.start(core.scheduler(), ctx.clone(), backend)?;

        info!(
            "✅ Flats enabled with {} flat(s), language {}",
            ctx.cache.read().len(),
            ctx.i18n.locale()
        );
        Ok(Self {
            ctx,
            storage,
            auto_save,
            subscriptions,
        })
    }

    pub fn context(&self) -> &Arc<FlatsContext> {
        &self.ctx
    }

    /// Translated lines for the outcome of a `/flats` invocation.
    pub fn reply_lines(&self, result: &CommandResult<CommandOutput>) -> Vec<String> {
        commands::reply_lines(&self.ctx.i18n, result)
    }

    /// Writes every flat to disk right away.
    pub fn save(&self) -> PluginResult<()> {
        let flats = self.ctx.cache.read().snapshot();
        self.storage.save_all_blocking(&flats)?;
        Ok(())
    }

    /// Saves the flats and removes everything the plugin registered.
    ///
    /// Auto-save writes still running when this is called lose to the final
    /// save. The plugin is torn down even when saving fails; the save error is
    /// returned afterwards.
    pub fn disable(self, core: &Core) -> PluginResult<()> {
        // Auto-save goes first so no snapshot is taken after the final one.
        self.auto_save.stop(core.scheduler());
        let saved = self.save();
        if let Err(e) = &saved {
            error!("❌ Failed to save flats on disable: {}", e);
        }

        stop_all_delays(core.store(), core.scheduler());
        core.scheduler().cancel_named(commands::SHOW_TASK);
        for id in &self.subscriptions {
            core.router().unsubscribe(*id);
        }
        core.commands().unregister(ROOT);

        info!("👋 Flats disabled");
        saved
    }
}
