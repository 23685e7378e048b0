//! The core assembly and the tick loop that drives it.
//!
//! [`Core`] wires the state store, scheduler, router and dispatcher together.
//! [`TickLoop`] advances the logical clock on a tokio interval and, for every
//! tick, runs in order:
//!
//! 1. every envelope and command invocation the host queued, in the order
//!    it delivered them,
//! 2. results handed back by out-of-band work,
//! 3. every task due at this tick.

use crate::commands::{CommandDispatcher, CommandFeed, CommandOutput};
use crate::error::CommandResult;
use crate::event::{Envelope, EventFeed, Inbound, InboundQueue};
use crate::router::{DispatchOutcome, EventRouter};
use crate::scheduler::{TaskScheduler, TickRunReport, DEFAULT_HISTORY_LIMIT};
use crate::store::StateStore;
use crate::types::{EntityHandle, Tick, TickClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};

/// Tunables of the dispatch core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Wall-time budget of one tick in milliseconds.
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    /// Follow-up envelopes one dispatch may produce before the rest are dropped.
    #[serde(default = "default_max_followups")]
    pub max_followups: usize,
    /// Finished tasks whose terminal state stays queryable.
    #[serde(default = "default_task_history")]
    pub task_history: usize,
}

fn default_tick_budget_ms() -> u64 {
    50
}

fn default_max_followups() -> usize {
    crate::router::DEFAULT_MAX_FOLLOWUPS
}

fn default_task_history() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: default_tick_budget_ms(),
            max_followups: default_max_followups(),
            task_history: default_task_history(),
        }
    }
}

impl CoreConfig {
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: Tick,
    pub events: usize,
    pub commands: usize,
    pub tasks: TickRunReport,
    pub elapsed: Duration,
}

/// The assembled dispatch core.
pub struct Core {
    clock: TickClock,
    budget: Duration,
    store: Arc<StateStore>,
    scheduler: Arc<TaskScheduler>,
    router: Arc<EventRouter>,
    commands: Arc<CommandDispatcher>,
    inbound: InboundQueue,
}

impl Default for Core {
    fn default() -> Self {
        Self::new(&CoreConfig::default())
    }
}

impl Core {
    pub fn new(config: &CoreConfig) -> Self {
        let clock = TickClock::new();
        let store = Arc::new(StateStore::new());
        let scheduler = Arc::new(TaskScheduler::with_history_limit(config.task_history));
        store.add_removal_hook(scheduler.clone());

        let router = Arc::new(
            EventRouter::new()
                .with_budget(config.tick_budget())
                .with_max_followups(config.max_followups),
        );

        Self {
            clock,
            budget: config.tick_budget(),
            store,
            scheduler,
            router,
            commands: Arc::new(CommandDispatcher::new()),
            inbound: InboundQueue::new(),
        }
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn commands(&self) -> &Arc<CommandDispatcher> {
        &self.commands
    }

    pub fn event_feed(&self) -> EventFeed {
        EventFeed::new(self.inbound.sender(), self.clock.clone())
    }

    pub fn command_feed(&self) -> CommandFeed {
        CommandFeed::new(self.inbound.sender())
    }

    /// Advances the clock and processes one tick.
    pub fn tick(&self) -> TickReport {
        let tick = self.clock.advance();
        let started = Instant::now();
        self.scheduler.begin_tick(tick);

        let (mut events, mut commands) = (0, 0);
        for item in self.inbound.drain() {
            match item {
                Inbound::Event(item) => {
                    self.router.deliver(item, &self.store, &self.scheduler);
                    events += 1;
                }
                Inbound::Command(command) => {
                    self.commands
                        .run_queued(command, &self.store, &self.scheduler, tick);
                    commands += 1;
                }
            }
        }
        let tasks = self.scheduler.run_tick(tick, &self.store);

        let elapsed = started.elapsed();
        if elapsed > self.budget {
            warn!(
                "⚠️ Tick {} took {:?} ({} events, {} commands, {} tasks), over the {:?} budget",
                tick, elapsed, events, commands, tasks.ran, self.budget
            );
        }
        TickReport {
            tick,
            events,
            commands,
            tasks,
            elapsed,
        }
    }

    /// Dispatches an envelope immediately. Must be called from the tick thread.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        self.router.dispatch(envelope, &self.store, &self.scheduler)
    }

    /// Invokes a command immediately. Must be called from the tick thread.
    pub fn invoke(&self, requester: EntityHandle, name: &str, args: &[String]) -> CommandResult<CommandOutput> {
        self.commands
            .invoke(requester, name, args, &self.store, &self.scheduler, self.clock.now())
    }

    pub fn complete(&self, requester: EntityHandle, name: &str, args: &[String]) -> Vec<String> {
        self.commands.complete(requester, name, args, &self.store)
    }

    /// Releases every record, cancelling the tasks they own.
    pub fn shutdown(&self) {
        let records = self.store.len();
        self.store.clear();
        info!(
            "🧹 Released {} record(s); {} task(s) still scheduled",
            records,
            self.scheduler.pending_count()
        );
    }
}

/// Drives [`Core::tick`] at a fixed interval until shutdown is signalled.
pub struct TickLoop {
    core: Arc<Core>,
    interval: Duration,
}

impl TickLoop {
    pub fn new(core: Arc<Core>, interval: Duration) -> Self {
        Self { core, interval }
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    /// Returns the number of ticks processed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("⏱️ Tick loop started ({:?} per tick)", self.interval);

        let mut ticks = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.core.tick();
                    ticks += 1;
                    trace!(
                        "Tick {}: {} events, {} commands, {} tasks in {:?}",
                        report.tick, report.events, report.commands, report.tasks.ran, report.elapsed
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("🛑 Tick loop stopped after {} ticks", ticks);
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ArgSpec, CommandContext, CommandSpec, InvocationState};
    use crate::event::EventKind;
    use crate::router::EventPriority;
    use crate::scheduler::Task;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[test]
    fn tick_processes_inbound_items_in_delivery_order_before_tasks() {
        let core = Core::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let player = EntityHandle::new_player();
        core.store().create(player).unwrap();

        let l = log.clone();
        core.router().on(EventKind::PlayerMove, EventPriority::Normal, "log", move |_, _| {
            l.lock().push("event");
            Ok(())
        });
        let l = log.clone();
        core.commands().register(
            "ping",
            CommandSpec::new(move |_: &mut CommandContext<'_>| {
                l.lock().push("command");
                Ok(CommandOutput::new())
            }),
        );
        let l = log.clone();
        core.scheduler().schedule_once(1, move |_| {
            l.lock().push("task");
            Ok(())
        });

        core.command_feed().submit(player, "ping", Vec::new()).unwrap();
        core.event_feed()
            .submit(Envelope::new(EventKind::PlayerMove, 0, Value::Null).with_source(player))
            .unwrap();

        let report = core.tick();
        assert_eq!(report.tick, 1);
        assert_eq!((report.events, report.commands, report.tasks.ran), (1, 1, 1));
        assert_eq!(*log.lock(), vec!["command", "event", "task"]);
    }

    fn quitting_core() -> (Core, EntityHandle) {
        let core = Core::default();
        let player = EntityHandle::new_player();
        core.store().create(player).unwrap();
        core.router().on(EventKind::PlayerQuit, EventPriority::Monitor, "quit", |env, ctx| {
            if let Some(player) = env.source() {
                ctx.store().remove(player)?;
            }
            Ok(())
        });
        core.commands().register(
            "mark",
            CommandSpec::new(|ctx: &mut CommandContext<'_>| {
                ctx.set("mark", true)?;
                Ok(CommandOutput::new())
            }),
        );
        (core, player)
    }

    #[test]
    fn command_sent_before_quit_runs_before_the_record_goes() {
        let (core, player) = quitting_core();
        let mut report = core.command_feed().submit(player, "mark", Vec::new()).unwrap();
        core.event_feed()
            .submit(Envelope::new(EventKind::PlayerQuit, 0, Value::Null).with_source(player))
            .unwrap();

        let tick = core.tick();
        assert_eq!((tick.events, tick.commands), (1, 1));
        let report = report.try_recv().unwrap();
        assert_eq!(report.state, InvocationState::Completed);
        assert!(report.result.is_ok());
        assert!(!core.store().contains(player));
    }

    #[test]
    fn command_sent_after_quit_is_cancelled() {
        let (core, player) = quitting_core();
        core.event_feed()
            .submit(Envelope::new(EventKind::PlayerQuit, 0, Value::Null).with_source(player))
            .unwrap();
        let mut report = core.command_feed().submit_line(player, "/mark").unwrap();

        core.tick();
        assert_eq!(report.try_recv().unwrap().state, InvocationState::Cancelled);
    }

    #[test]
    fn event_feed_keeps_order_and_answers_requests() {
        let core = Core::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        core.router().on(EventKind::PlayerMove, EventPriority::Normal, "order", move |env, ctx| {
            l.lock().push(env.payload()["n"].as_i64().unwrap_or(-1));
            ctx.cancel();
            Ok(())
        });

        let feed = core.event_feed();
        for n in 0..3 {
            feed.submit(Envelope::new(EventKind::PlayerMove, 0, json!({ "n": n })))
                .unwrap();
        }
        let mut reply = feed
            .request(Envelope::new(EventKind::PlayerMove, 0, json!({ "n": 3 })))
            .unwrap();

        assert_eq!(core.tick().events, 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert!(reply.try_recv().unwrap().cancelled);
    }

    #[test]
    fn deferred_task_runs_after_its_command_commits() {
        let core = Core::default();
        let player = EntityHandle::new_player();
        core.store().create(player).unwrap();
        core.commands().register(
            "mark",
            CommandSpec::new(|ctx: &mut CommandContext<'_>| {
                let who = ctx.requester();
                let value = ctx.args().word("value").unwrap_or_default().to_string();
                ctx.set("mark", value)?;
                ctx.defer(Task::once(0, move |task| {
                    task.store().set(who, "seen_at", task.tick() as i64)?;
                    Ok(())
                }));
                Ok(CommandOutput::new())
            })
            .arg(ArgSpec::word("value")),
        );

        core.command_feed()
            .submit(player, "mark", vec!["a".to_string()])
            .unwrap();
        core.tick();
        assert_eq!(core.store().get(player, "mark").unwrap(), Some("a".into()));
        assert_eq!(core.store().get(player, "seen_at").unwrap(), Some(1i64.into()));
    }

    #[tokio::test]
    async fn tick_loop_stops_on_shutdown() {
        let core = Arc::new(Core::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(TickLoop::new(core.clone(), Duration::from_millis(1)).run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let ticks = handle.await.unwrap();
        assert!(ticks > 0);
        assert_eq!(core.now(), ticks);
    }
}
