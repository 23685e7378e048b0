//! # Task Scheduler
//!
//! Deferred and periodic work on the host's logical clock. Tasks run only
//! inside [`TaskScheduler::run_tick`], which the tick loop calls once per
//! tick, so task bodies always observe the state store as of that tick.
//!
//! ## Lifecycle
//!
//! `Queued → Running → {Completed, Cancelled, Failed}`. Terminal states are
//! kept in a bounded history so callers can still ask what happened to a
//! task after it finished.
//!
//! ## Out-of-band work
//!
//! [`TaskScheduler::offload`] runs a future on the tokio runtime. Its output
//! is sent back through a handoff channel and applied by a reintegration task
//! on the tick thread. Cancelling the task (directly or by removing its owner)
//! discards the output when it arrives.

use crate::error::{TaskError, TaskResult};
use crate::store::{RemovalHook, StateStore};
use crate::types::{EntityHandle, Tick};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Number of finished tasks whose terminal state is remembered.
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

/// Identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled | TaskState::Failed)
    }
}

type TaskBody = Box<dyn FnMut(&TaskContext<'_>) -> TaskResult<()> + Send>;
type ReintegrationFn = Box<dyn FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send>;

fn once_body<F>(f: F) -> TaskBody
where
    F: FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
{
    let mut slot = Some(f);
    Box::new(move |ctx: &TaskContext<'_>| match slot.take() {
        Some(f) => f(ctx),
        None => Ok(()),
    })
}

/// Description of a task before it is submitted.
///
/// ```rust
/// use flats_core::{EntityHandle, Task, TaskScheduler};
///
/// let scheduler = TaskScheduler::new();
/// let player = EntityHandle::new_player();
/// let task = Task::once(200, |_ctx| Ok(()))
///     .named("rank-expiry")
///     .owned_by(player);
/// let handle = scheduler.submit(task).unwrap();
/// assert!(scheduler.state(handle).is_some());
/// ```
pub struct Task {
    name: String,
    owner: Option<EntityHandle>,
    delay: Tick,
    period: Option<Tick>,
    body: TaskBody,
}

impl Task {
    /// A task that runs once, `delay` ticks from now.
    pub fn once<F>(delay: Tick, f: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        Self {
            name: "task".to_string(),
            owner: None,
            delay,
            period: None,
            body: once_body(f),
        }
    }

    /// A task that runs every `period` ticks, first after one period.
    pub fn repeating<F>(period: Tick, f: F) -> Self
    where
        F: FnMut(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        Self {
            name: "task".to_string(),
            owner: None,
            delay: period,
            period: Some(period),
            body: Box::new(f),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn owned_by(mut self, owner: EntityHandle) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Overrides the delay before the first run.
    pub fn after(mut self, delay: Tick) -> Self {
        self.delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<EntityHandle> {
        self.owner
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("delay", &self.delay)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// What a running task body can see.
pub struct TaskContext<'a> {
    tick: Tick,
    handle: TaskHandle,
    owner: Option<EntityHandle>,
    store: &'a StateStore,
    scheduler: &'a TaskScheduler,
    stop: Cell<bool>,
}

impl<'a> TaskContext<'a> {
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn owner(&self) -> Option<EntityHandle> {
        self.owner
    }

    pub fn store(&self) -> &'a StateStore {
        self.store
    }

    pub fn scheduler(&self) -> &'a TaskScheduler {
        self.scheduler
    }

    /// Ends a repeating task as `Completed` after the current run.
    pub fn stop(&self) {
        self.stop.set(true);
    }
}

struct TaskEntry {
    name: String,
    owner: Option<EntityHandle>,
    period: Option<Tick>,
    state: TaskState,
    body: Option<TaskBody>,
    queue_key: Option<(Tick, u64)>,
    cancel_requested: bool,
}

struct Reintegration {
    handle: TaskHandle,
    apply: ReintegrationFn,
}

struct Inner {
    entries: HashMap<TaskHandle, TaskEntry>,
    queue: BTreeMap<(Tick, u64), TaskHandle>,
    history: HashMap<TaskHandle, TaskState>,
    history_order: VecDeque<TaskHandle>,
    history_limit: usize,
    next_id: u64,
    next_seq: u64,
    current_tick: Tick,
}

impl Inner {
    fn allocate(&mut self) -> TaskHandle {
        self.next_id += 1;
        TaskHandle(self.next_id)
    }

    fn enqueue(&mut self, handle: TaskHandle, due: Tick) -> (Tick, u64) {
        let key = (due, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(key, handle);
        key
    }

    fn retire(&mut self, handle: TaskHandle, state: TaskState) {
        if let Some(entry) = self.entries.remove(&handle) {
            if let Some(key) = entry.queue_key {
                self.queue.remove(&key);
            }
        }
        self.history.insert(handle, state);
        self.history_order.push_back(handle);
        while self.history_order.len() > self.history_limit {
            if let Some(old) = self.history_order.pop_front() {
                self.history.remove(&old);
            }
        }
    }

    /// Earliest task due at `tick` that was queued before the tick began.
    fn next_due(&self, tick: Tick, seq_limit: u64) -> Option<((Tick, u64), TaskHandle)> {
        self.queue
            .range(..=(tick, u64::MAX))
            .find(|((_, seq), _)| *seq < seq_limit)
            .map(|(key, handle)| (*key, *handle))
    }
}

/// Summary of one [`TaskScheduler::run_tick`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickRunReport {
    pub ran: usize,
    pub failed: usize,
    pub reintegrated: usize,
}

/// Tick-driven task scheduler.
pub struct TaskScheduler {
    inner: Mutex<Inner>,
    handoff_tx: mpsc::UnboundedSender<Reintegration>,
    handoff_rx: Mutex<mpsc::UnboundedReceiver<Reintegration>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// Creates a scheduler. Out-of-band work uses the current tokio runtime,
    /// if there is one.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                queue: BTreeMap::new(),
                history: HashMap::new(),
                history_order: VecDeque::new(),
                history_limit: history_limit.max(1),
                next_id: 0,
                next_seq: 0,
                current_tick: 0,
            }),
            handoff_tx,
            handoff_rx: Mutex::new(handoff_rx),
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    /// Uses an explicit runtime for out-of-band work.
    pub fn with_runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Submits a task. Its delay counts from the tick currently being processed.
    pub fn submit(&self, task: Task) -> TaskResult<TaskHandle> {
        if task.period == Some(0) {
            return Err(TaskError::InvalidPeriod);
        }
        Ok(self.insert(task))
    }

    fn insert(&self, task: Task) -> TaskHandle {
        let mut inner = self.inner.lock();
        let handle = inner.allocate();
        // A due tick past the end of time never comes.
        let due = inner.current_tick.saturating_add(task.delay);
        let key = inner.enqueue(handle, due);
        trace!("Scheduled {} '{}' for tick {}", handle, task.name, due);
        inner.entries.insert(
            handle,
            TaskEntry {
                name: task.name,
                owner: task.owner,
                period: task.period,
                state: TaskState::Queued,
                body: Some(task.body),
                queue_key: Some(key),
                cancel_requested: false,
            },
        );
        handle
    }

    pub fn schedule_once<F>(&self, delay: Tick, f: F) -> TaskHandle
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        self.insert(Task::once(delay, f))
    }

    pub fn schedule_repeating<F>(&self, period: Tick, f: F) -> TaskResult<TaskHandle>
    where
        F: FnMut(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        self.submit(Task::repeating(period, f))
    }

    pub fn schedule_repeating_after<F>(&self, delay: Tick, period: Tick, f: F) -> TaskResult<TaskHandle>
    where
        F: FnMut(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        self.submit(Task::repeating(period, f).after(delay))
    }

    /// Runs `work` on the async runtime and applies its output with `then`
    /// on the tick thread.
    pub fn offload<Fut, T, F>(
        &self,
        name: &str,
        owner: Option<EntityHandle>,
        work: Fut,
        then: F,
    ) -> TaskResult<TaskHandle>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(T, &TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        let runtime = self.runtime.clone().ok_or(TaskError::NoRuntime)?;

        let handle = {
            let mut inner = self.inner.lock();
            let handle = inner.allocate();
            inner.entries.insert(
                handle,
                TaskEntry {
                    name: name.to_string(),
                    owner,
                    period: None,
                    state: TaskState::Queued,
                    body: None,
                    queue_key: None,
                    cancel_requested: false,
                },
            );
            handle
        };

        let tx = self.handoff_tx.clone();
        runtime.spawn(async move {
            let output = work.await;
            let apply: ReintegrationFn =
                Box::new(move |ctx: &TaskContext<'_>| then(output, ctx));
            if tx.send(Reintegration { handle, apply }).is_err() {
                debug!("Scheduler gone before {} could be reintegrated", handle);
            }
        });
        debug!("Offloaded {} '{}'", handle, name);
        Ok(handle)
    }

    // ========================================================================
    // Cancellation & queries
    // ========================================================================

    /// Cancels a task. Returns `false` when the task had already finished.
    ///
    /// A queued task never runs after this. A running task finishes its
    /// current run and is not rescheduled.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let mut inner = self.inner.lock();
        let state = match inner.entries.get(&handle) {
            Some(entry) => entry.state,
            None => return false,
        };
        match state {
            TaskState::Queued => {
                inner.retire(handle, TaskState::Cancelled);
                debug!("Cancelled {}", handle);
                true
            }
            TaskState::Running => {
                if let Some(entry) = inner.entries.get_mut(&handle) {
                    entry.cancel_requested = true;
                }
                true
            }
            _ => false,
        }
    }

    /// Cancels every live task owned by `owner` and returns how many there were.
    pub fn cancel_owned_by(&self, owner: EntityHandle) -> usize {
        let owned: Vec<TaskHandle> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| e.owner == Some(owner))
                .map(|(h, _)| *h)
                .collect()
        };
        owned.into_iter().filter(|h| self.cancel(*h)).count()
    }

    /// Cancels every live task with the given name.
    pub fn cancel_named(&self, name: &str) -> usize {
        let named: Vec<TaskHandle> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| e.name == name)
                .map(|(h, _)| *h)
                .collect()
        };
        named.into_iter().filter(|h| self.cancel(*h)).count()
    }

    /// Current state of a task, or `None` if it is unknown or long forgotten.
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&handle)
            .map(|e| e.state)
            .or_else(|| inner.history.get(&handle).copied())
    }

    /// Number of tasks that are queued or running.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn current_tick(&self) -> Tick {
        self.inner.lock().current_tick
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Moves the scheduling origin to `tick` before anything else runs in it,
    /// so delays requested by events and commands count from this tick.
    pub fn begin_tick(&self, tick: Tick) {
        self.inner.lock().current_tick = tick;
    }

    fn drain_handoff(&self, tick: Tick) -> usize {
        let mut rx = self.handoff_rx.lock();
        let mut reintegrated = 0;
        while let Ok(Reintegration { handle, apply }) = rx.try_recv() {
            let mut inner = self.inner.lock();
            let waiting = inner
                .entries
                .get(&handle)
                .is_some_and(|e| e.state == TaskState::Queued && e.queue_key.is_none());
            if !waiting {
                debug!("Discarding result for cancelled {}", handle);
                continue;
            }
            let key = inner.enqueue(handle, tick);
            if let Some(entry) = inner.entries.get_mut(&handle) {
                entry.body = Some(once_body(apply));
                entry.queue_key = Some(key);
            }
            reintegrated += 1;
        }
        reintegrated
    }

    /// Runs every task due at `tick`.
    ///
    /// Results handed back by out-of-band work are queued first. Tasks
    /// scheduled while this tick is running wait for the next tick.
    pub fn run_tick(&self, tick: Tick, store: &StateStore) -> TickRunReport {
        self.inner.lock().current_tick = tick;
        let mut report = TickRunReport {
            reintegrated: self.drain_handoff(tick),
            ..Default::default()
        };
        let seq_limit = self.inner.lock().next_seq;

        loop {
            let (handle, mut body, owner, name) = {
                let mut inner = self.inner.lock();
                let Some((key, handle)) = inner.next_due(tick, seq_limit) else {
                    break;
                };
                inner.queue.remove(&key);
                let Some(entry) = inner.entries.get_mut(&handle) else {
                    continue;
                };
                entry.queue_key = None;
                entry.state = TaskState::Running;
                let owner = entry.owner;
                let name = entry.name.clone();
                match entry.body.take() {
                    Some(body) => (handle, body, owner, name),
                    None => {
                        warn!("{} '{}' had no body to run", handle, name);
                        inner.retire(handle, TaskState::Failed);
                        continue;
                    }
                }
            };

            let ctx = TaskContext {
                tick,
                handle,
                owner,
                store,
                scheduler: self,
                stop: Cell::new(false),
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| body(&ctx)));
            let stop = ctx.stop.get();
            report.ran += 1;

            let result = match outcome {
                Ok(result) => result,
                Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
            };
            if let Err(e) = &result {
                report.failed += 1;
                error!("❌ {} '{}' failed at tick {}: {}", handle, name, tick, e);
            }
            self.finish_run(handle, body, result.is_ok(), stop, tick);
        }

        report
    }

    fn finish_run(&self, handle: TaskHandle, body: TaskBody, succeeded: bool, stop: bool, tick: Tick) {
        let mut inner = self.inner.lock();
        let Some((period, cancel_requested)) = inner
            .entries
            .get(&handle)
            .map(|e| (e.period, e.cancel_requested))
        else {
            return;
        };

        let final_state = match (succeeded, period) {
            (false, _) => TaskState::Failed,
            (true, Some(_)) if cancel_requested => TaskState::Cancelled,
            (true, Some(_)) if stop => TaskState::Completed,
            (true, Some(period)) => {
                let key = inner.enqueue(handle, tick.saturating_add(period));
                if let Some(entry) = inner.entries.get_mut(&handle) {
                    entry.state = TaskState::Queued;
                    entry.body = Some(body);
                    entry.queue_key = Some(key);
                }
                return;
            }
            (true, None) => TaskState::Completed,
        };
        inner.retire(handle, final_state);
    }
}

impl RemovalHook for TaskScheduler {
    fn on_remove(&self, handle: EntityHandle) {
        let cancelled = self.cancel_owned_by(handle);
        if cancelled > 0 {
            debug!("Cancelled {} task(s) owned by {}", cancelled, handle);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn once_task_runs_at_target_tick() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        let handle = scheduler.schedule_once(3, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for tick in 1..=2 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(handle), Some(TaskState::Queued));

        scheduler.run_tick(3, &store);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(handle), Some(TaskState::Completed));
    }

    #[test]
    fn huge_delays_and_periods_stay_queued() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        scheduler.run_tick(5, &store);

        let r = runs.clone();
        let far = scheduler
            .submit(Task::once(u64::MAX, move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        let r = runs.clone();
        let forever = scheduler
            .submit(
                Task::repeating(u64::MAX, move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .after(1),
            )
            .unwrap();

        for tick in 6..=10 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(far), Some(TaskState::Queued));
        assert_eq!(scheduler.state(forever), Some(TaskState::Queued));
    }

    #[test]
    fn cancelled_task_never_runs_and_cancel_is_idempotent() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        let handle = scheduler.schedule_once(1, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        scheduler.run_tick(1, &store);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(handle), Some(TaskState::Cancelled));
    }

    #[test]
    fn cancelling_completed_task_is_noop() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let handle = scheduler.schedule_once(0, |_| Ok(()));
        scheduler.run_tick(1, &store);
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.state(handle), Some(TaskState::Completed));
    }

    #[test]
    fn repeating_task_runs_every_period() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        let handle = scheduler
            .schedule_repeating(2, move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        for tick in 1..=6 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.state(handle), Some(TaskState::Queued));

        scheduler.cancel(handle);
        for tick in 7..=10 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_repeating_task_is_not_rescheduled() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        let handle = scheduler
            .schedule_repeating(1, move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::Failed("disk full".into()))
            })
            .unwrap();

        for tick in 1..=5 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(handle), Some(TaskState::Failed));
    }

    #[test]
    fn panicking_task_fails_without_affecting_others() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        let bad = scheduler.schedule_once(1, |_| panic!("boom"));
        let good = scheduler.schedule_once(1, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = scheduler.run_tick(1, &store);
        assert_eq!(report.ran, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(scheduler.state(bad), Some(TaskState::Failed));
        assert_eq!(scheduler.state(good), Some(TaskState::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_tick_tasks_run_in_scheduling_order() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            scheduler.schedule_once(2, move |_| {
                order.lock().push(i);
                Ok(())
            });
        }
        scheduler.run_tick(1, &store);
        scheduler.run_tick(2, &store);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn task_can_cancel_a_later_task_in_the_same_tick() {
        let store = StateStore::new();
        let scheduler = Arc::new(TaskScheduler::new());
        let runs = counter();
        let victim_slot = Arc::new(Mutex::new(None::<TaskHandle>));

        let slot = victim_slot.clone();
        scheduler.schedule_once(1, move |ctx| {
            if let Some(victim) = *slot.lock() {
                ctx.scheduler().cancel(victim);
            }
            Ok(())
        });
        let r = runs.clone();
        let victim = scheduler.schedule_once(1, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *victim_slot.lock() = Some(victim);

        scheduler.run_tick(1, &store);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(victim), Some(TaskState::Cancelled));
    }

    #[test]
    fn tasks_scheduled_during_a_tick_wait_for_the_next() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let runs = counter();
        let r = runs.clone();
        scheduler.schedule_once(1, move |ctx| {
            let r = r.clone();
            ctx.scheduler().schedule_once(0, move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        scheduler.run_tick(1, &store);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        scheduler.run_tick(2, &store);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_completes_repeating_task() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let mut remaining = 3;
        let handle = scheduler
            .schedule_repeating(1, move |ctx| {
                remaining -= 1;
                if remaining == 0 {
                    ctx.stop();
                }
                Ok(())
            })
            .unwrap();

        for tick in 1..=10 {
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(scheduler.state(handle), Some(TaskState::Completed));
    }

    #[test]
    fn owner_removal_cancels_owned_tasks() {
        let store = StateStore::new();
        let scheduler = Arc::new(TaskScheduler::new());
        store.add_removal_hook(scheduler.clone());

        let player = EntityHandle::new_player();
        let other = EntityHandle::new_player();
        store.create(player).unwrap();
        store.create(other).unwrap();

        let mine = scheduler
            .submit(Task::once(5, |_| Ok(())).owned_by(player))
            .unwrap();
        let theirs = scheduler
            .submit(Task::repeating(5, |_| Ok(())).owned_by(other))
            .unwrap();

        store.remove(player).unwrap();
        assert_eq!(scheduler.state(mine), Some(TaskState::Cancelled));
        assert_eq!(scheduler.state(theirs), Some(TaskState::Queued));
    }

    #[test]
    fn cancel_named_only_hits_matching_tasks() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.submit(Task::once(5, |_| Ok(())).named("cooldown")).unwrap();
        let b = scheduler
            .submit(Task::repeating(5, |_| Ok(())).named("cooldown"))
            .unwrap();
        let c = scheduler.submit(Task::once(5, |_| Ok(())).named("autosave")).unwrap();

        assert_eq!(scheduler.cancel_named("cooldown"), 2);
        assert_eq!(scheduler.state(a), Some(TaskState::Cancelled));
        assert_eq!(scheduler.state(b), Some(TaskState::Cancelled));
        assert_eq!(scheduler.state(c), Some(TaskState::Queued));
        assert_eq!(scheduler.cancel_named("cooldown"), 0);
    }

    #[test]
    fn zero_period_is_rejected() {
        let scheduler = TaskScheduler::new();
        assert_eq!(
            scheduler.schedule_repeating(0, |_| Ok(())).unwrap_err(),
            TaskError::InvalidPeriod
        );
    }

    #[test]
    fn offload_without_runtime_fails() {
        let scheduler = TaskScheduler::new();
        let result = scheduler.offload("io", None, async { 1 }, |_, _| Ok(()));
        assert_eq!(result.unwrap_err(), TaskError::NoRuntime);
    }

    #[tokio::test]
    async fn offloaded_result_is_applied_on_a_tick() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let player = EntityHandle::new_player();
        store.create(player).unwrap();

        let handle = scheduler
            .offload("lookup", Some(player), async { 42i64 }, move |value, ctx| {
                ctx.store().set(player, "answer", value)?;
                Ok(())
            })
            .unwrap();

        let mut tick = 0;
        while scheduler.state(handle) != Some(TaskState::Completed) && tick < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            tick += 1;
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(store.get(player, "answer").unwrap(), Some(42i64.into()));
    }

    #[tokio::test]
    async fn offloaded_result_is_discarded_after_cancel() {
        let store = StateStore::new();
        let scheduler = TaskScheduler::new();
        let applied = counter();
        let a = applied.clone();

        let handle = scheduler
            .offload("lookup", None, async { 1 }, move |_, _| {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(scheduler.cancel(handle));

        for tick in 1..=10 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            scheduler.run_tick(tick, &store);
        }
        assert_eq!(applied.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(handle), Some(TaskState::Cancelled));
    }
}
