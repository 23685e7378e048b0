//! Auto-save and per-player command delays.

use crate::context::FlatsContext;
use crate::error::{PluginError, PluginResult};
use crate::storage::{FlatsStorage, SaveOutcome};
use flats_core::{
    CommandContext, CommandResult, EntityHandle, EntityKind, StateStore, StoreView, Task, TaskHandle,
    TaskScheduler, Tick, TICKS_PER_SECOND,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const AUTO_SAVE_TASK: &str = "flats-autosave";
pub const AUTO_SAVE_WRITE: &str = "flats-autosave-write";
pub const COMMAND_DELAY_TASK: &str = "flats-command-delay";

// ============================================================================
// Auto-save
// ============================================================================

/// Periodically snapshots the flats on the tick thread and writes them on a
/// worker.
#[derive(Debug, Default)]
pub struct AutoSaveScheduler {
    task: Mutex<Option<TaskHandle>>,
}

impl AutoSaveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn start(
        &self,
        scheduler: &TaskScheduler,
        ctx: Arc<FlatsContext>,
        storage: Arc<dyn FlatsStorage>,
    ) -> PluginResult<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(PluginError::AutoSaveRunning);
        }
        let Some(period) = ctx.settings.auto_save_period() else {
            info!("Auto saving is disabled as auto_save_interval is not above 0");
            return Ok(());
        };

        let handle = scheduler.submit(
            Task::repeating(period, move |run| {
                let snapshot = storage.snapshot(ctx.cache.read().snapshot());
                let storage = storage.clone();
                let count = snapshot.flats().len();
                let offloaded = run.scheduler().offload(
                    AUTO_SAVE_WRITE,
                    None,
                    async move { storage.write(snapshot).await },
                    move |result, _| {
                        match result {
                            Ok(SaveOutcome::Written) => debug!("💾 Auto-saved {} flat(s)", count),
                            Ok(SaveOutcome::Superseded) => {
                                debug!("Auto-save overtaken by a newer save")
                            }
                            Err(e) => error!("❌ Auto-save failed: {}", e),
                        }
                        Ok(())
                    },
                );
                if let Err(e) = offloaded {
                    warn!("⚠️ Could not start auto-save write: {}", e);
                }
                Ok(())
            })
            .named(AUTO_SAVE_TASK),
        )?;

        info!(
            "Started auto-save every {} second(s)",
            period / TICKS_PER_SECOND
        );
        *task = Some(handle);
        Ok(())
    }

    /// Stops the timer and drops the results of writes still in flight.
    pub fn stop(&self, scheduler: &TaskScheduler) {
        if let Some(handle) = self.task.lock().take() {
            scheduler.cancel(handle);
            let in_flight = scheduler.cancel_named(AUTO_SAVE_WRITE);
            info!("Stopped auto-save ({} write(s) in flight)", in_flight);
        }
    }
}

// ============================================================================
// Command delays
// ============================================================================

fn delay_key(command: &str) -> String {
    format!("cooldown.{}", command)
}

/// Ticks left before `player` may run `command` again.
pub fn remaining_delay(store: StoreView<'_>, player: EntityHandle, command: &str, now: Tick) -> Option<Tick> {
    let expiry = store.get(player, &delay_key(command)).ok().flatten()?.as_int()?;
    let expiry = u64::try_from(expiry).ok()?;
    (expiry > now).then(|| expiry - now)
}

/// Puts the requester on a delay for `command`, applied when the command commits.
pub fn start_delay(ctx: &mut CommandContext<'_>, command: &str, seconds: u64) -> CommandResult<()> {
    let ticks = seconds.saturating_mul(TICKS_PER_SECOND);
    let key = delay_key(command);
    let expiry = i64::try_from(ctx.tick().saturating_add(ticks)).unwrap_or(i64::MAX);
    ctx.set(&key, expiry)?;

    let player = ctx.requester();
    ctx.defer(
        Task::once(ticks, move |run| {
            // The player may have left and taken the record with them.
            if run.store().contains(player) {
                run.store().unset(player, &key)?;
            }
            Ok(())
        })
        .named(COMMAND_DELAY_TASK)
        .owned_by(player),
    );
    Ok(())
}

/// Cancels every pending delay and clears the delays from player records.
pub fn stop_all_delays(store: &StateStore, scheduler: &TaskScheduler) -> usize {
    let cancelled = scheduler.cancel_named(COMMAND_DELAY_TASK);
    for player in store.handles_of(EntityKind::Player) {
        let _ = store.update(player, |attrs| attrs.retain(|key, _| !key.starts_with("cooldown.")));
    }
    debug!("Cancelled {} command delay(s)", cancelled);
    cancelled
}
