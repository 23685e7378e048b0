//! # Event Router
//!
//! Dispatches event envelopes to subscribed handlers in priority order.
//!
//! ## Ordering
//!
//! Handlers run from [`EventPriority::Highest`] down to
//! [`EventPriority::Lowest`]; handlers with equal priority run in
//! subscription order. A handler that consumes the envelope stops every
//! lower-priority handler. [`EventPriority::Monitor`] handlers run last and
//! always, and cannot consume.
//!
//! ## Isolation
//!
//! Each handler call is wrapped so an error or panic is logged against that
//! handler alone; the remaining handlers still run.
//!
//! ## Follow-up events
//!
//! Handlers may emit new envelopes through [`DispatchContext::emit`]. They
//! are dispatched after the current envelope finishes, within the same
//! [`EventRouter::dispatch`] call.

use crate::error::{EventError, EventResult};
use crate::event::{Envelope, EventKind, FeedItem};
use crate::scheduler::{panic_message, TaskScheduler};
use crate::store::StateStore;
use crate::types::{EntityHandle, Tick};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Default wall-time budget for a single dispatch (one 20 TPS tick).
pub const DEFAULT_DISPATCH_BUDGET: Duration = Duration::from_millis(50);

/// Default cap on follow-up envelopes produced by one dispatch.
pub const DEFAULT_MAX_FOLLOWUPS: usize = 64;

/// Handler priority, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    /// Observes the final outcome. Runs after everything else.
    Monitor,
}

impl EventPriority {
    /// Position in dispatch order; smaller runs first.
    fn dispatch_rank(self) -> u8 {
        match self {
            EventPriority::Highest => 0,
            EventPriority::High => 1,
            EventPriority::Normal => 2,
            EventPriority::Low => 3,
            EventPriority::Lowest => 4,
            EventPriority::Monitor => 5,
        }
    }
}

/// Identifier returned by [`EventRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ============================================================================
// Dispatch context & outcome
// ============================================================================

/// Mutable view handed to each handler during one dispatch.
pub struct DispatchContext<'a> {
    store: &'a StateStore,
    scheduler: &'a TaskScheduler,
    tick: Tick,
    consumed: bool,
    cancelled: bool,
    amendments: Map<String, Value>,
    emitted: Vec<Envelope>,
}

impl<'a> DispatchContext<'a> {
    fn new(store: &'a StateStore, scheduler: &'a TaskScheduler, tick: Tick) -> Self {
        Self {
            store,
            scheduler,
            tick,
            consumed: false,
            cancelled: false,
            amendments: Map::new(),
            emitted: Vec::new(),
        }
    }

    pub fn store(&self) -> &'a StateStore {
        self.store
    }

    pub fn scheduler(&self) -> &'a TaskScheduler {
        self.scheduler
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Stops lower-priority handlers from seeing this envelope.
    pub fn consume(&mut self) {
        self.consumed = true;
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Marks the host event as cancelled.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Records a change the host should apply to its event, e.g. a filtered
    /// block list for an explosion.
    pub fn amend(&mut self, field: impl Into<String>, value: Value) {
        self.amendments.insert(field.into(), value);
    }

    pub fn amendment(&self, field: &str) -> Option<&Value> {
        self.amendments.get(field)
    }

    /// Queues a follow-up envelope.
    pub fn emit(&mut self, envelope: Envelope) {
        self.emitted.push(envelope);
    }

    /// Serializes `event` into a follow-up envelope stamped with this tick.
    pub fn emit_event<T: Serialize>(
        &mut self,
        kind: EventKind,
        sources: impl IntoIterator<Item = EntityHandle>,
        event: &T,
    ) -> EventResult<()> {
        let envelope = Envelope::from_event(kind, self.tick, event)?.with_sources(sources);
        self.emit(envelope);
        Ok(())
    }
}

/// Result of dispatching one envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub consumed: bool,
    pub cancelled: bool,
    /// Handlers that ran.
    pub handled: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// Follow-up envelopes dispatched afterwards.
    pub followups: usize,
    pub amendments: Map<String, Value>,
}

// ============================================================================
// Handlers
// ============================================================================

pub trait EventHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope, ctx: &mut DispatchContext<'_>) -> EventResult<()>;
    fn handler_name(&self) -> &str;
}

/// Handler over the raw envelope.
pub struct FnEventHandler<F> {
    name: String,
    handler: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&Envelope, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&Envelope, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope, ctx: &mut DispatchContext<'_>) -> EventResult<()> {
        (self.handler)(envelope, ctx)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Handler that decodes the payload into `T` before calling `F`.
pub struct TypedEventHandler<T, F> {
    name: String,
    handler: F,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, F> TypedEventHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<T, F> EventHandler for TypedEventHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope, ctx: &mut DispatchContext<'_>) -> EventResult<()> {
        let event = envelope.decode::<T>()?;
        (self.handler)(event, ctx)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Router
// ============================================================================

struct Subscription {
    id: SubscriptionId,
    priority: EventPriority,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub total_handlers: usize,
    pub events_dispatched: u64,
    pub handler_failures: u64,
    pub consumed: u64,
    pub slow_dispatches: u64,
}

pub struct EventRouter {
    handlers: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
    stats: Mutex<RouterStats>,
    budget: Duration,
    max_followups: usize,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Mutex::new(RouterStats::default()),
            budget: DEFAULT_DISPATCH_BUDGET,
            max_followups: DEFAULT_MAX_FOLLOWUPS,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_followups(mut self, max_followups: usize) -> Self {
        self.max_followups = max_followups;
        self
    }

    // ========================================================================
    // Subscription management
    // ========================================================================

    pub fn subscribe(
        &self,
        kind: EventKind,
        priority: EventPriority,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = handler.handler_name().to_string();

        let mut handlers = self.handlers.write();
        let list = handlers.entry(kind.clone()).or_default();
        let rank = priority.dispatch_rank();
        let at = list
            .iter()
            .position(|s| s.priority.dispatch_rank() > rank)
            .unwrap_or(list.len());
        list.insert(
            at,
            Subscription {
                id,
                priority,
                handler,
            },
        );
        drop(handlers);

        self.stats.lock().total_handlers += 1;
        info!("📝 Registered handler {} for {} ({:?})", name, kind, priority);
        id
    }

    /// Subscribes a closure over the raw envelope.
    pub fn on<F>(&self, kind: EventKind, priority: EventPriority, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, priority, Arc::new(FnEventHandler::new(name, handler)))
    }

    /// Subscribes a closure that receives the payload decoded as `T`.
    pub fn on_typed<T, F>(&self, kind: EventKind, priority: EventPriority, name: &str, handler: F) -> SubscriptionId
    where
        T: DeserializeOwned + 'static,
        F: Fn(T, &mut DispatchContext<'_>) -> EventResult<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, priority, Arc::new(TypedEventHandler::new(name, handler)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(at) = list.iter().position(|s| s.id == id) {
                let removed = list.remove(at);
                drop(handlers);
                let mut stats = self.stats.lock();
                stats.total_handlers = stats.total_handlers.saturating_sub(1);
                debug!("Unsubscribed handler {}", removed.handler.handler_name());
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.lock().clone()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatches an envelope and any follow-ups its handlers emit.
    ///
    /// The returned outcome describes the original envelope.
    pub fn dispatch(&self, envelope: Envelope, store: &StateStore, scheduler: &TaskScheduler) -> DispatchOutcome {
        let started = Instant::now();
        let mut pending = VecDeque::new();
        let mut outcome = self.dispatch_one(&envelope, store, scheduler, &mut pending);

        while let Some(next) = pending.pop_front() {
            if outcome.followups >= self.max_followups {
                warn!(
                    "⚠️ Dropping {} follow-up event(s) of {}: limit of {} reached",
                    pending.len() + 1,
                    envelope.kind(),
                    self.max_followups
                );
                break;
            }
            outcome.followups += 1;
            self.dispatch_one(&next, store, scheduler, &mut pending);
        }

        let elapsed = started.elapsed();
        if elapsed > self.budget {
            warn!(
                "⚠️ Dispatch of {} took {:?}, over the {:?} tick budget",
                envelope.kind(),
                elapsed,
                self.budget
            );
            self.stats.lock().slow_dispatches += 1;
        }
        outcome
    }

    fn dispatch_one(
        &self,
        envelope: &Envelope,
        store: &StateStore,
        scheduler: &TaskScheduler,
        followups: &mut VecDeque<Envelope>,
    ) -> DispatchOutcome {
        let subscribers: Vec<(EventPriority, Arc<dyn EventHandler>)> = self
            .handlers
            .read()
            .get(envelope.kind())
            .map(|list| list.iter().map(|s| (s.priority, s.handler.clone())).collect())
            .unwrap_or_default();

        let mut outcome = DispatchOutcome::default();
        if subscribers.is_empty() {
            trace!("No handlers for {}", envelope.kind());
            return outcome;
        }
        debug!("📤 Dispatching {} to {} handlers", envelope.kind(), subscribers.len());

        let mut ctx = DispatchContext::new(store, scheduler, envelope.tick());
        for (priority, handler) in &subscribers {
            if *priority == EventPriority::Monitor {
                let consumed = ctx.consumed;
                Self::run_handler(handler.as_ref(), envelope, &mut ctx, &mut outcome);
                ctx.consumed = consumed;
            } else if !ctx.consumed {
                Self::run_handler(handler.as_ref(), envelope, &mut ctx, &mut outcome);
                if ctx.consumed {
                    trace!("{} consumed by {}", envelope.kind(), handler.handler_name());
                }
            }
        }

        followups.extend(ctx.emitted.drain(..));
        outcome.consumed = ctx.consumed;
        outcome.cancelled = ctx.cancelled;
        outcome.amendments = std::mem::take(&mut ctx.amendments);

        let mut stats = self.stats.lock();
        stats.events_dispatched += 1;
        stats.handler_failures += outcome.failed as u64;
        if outcome.consumed {
            stats.consumed += 1;
        }
        outcome
    }

    fn run_handler(
        handler: &dyn EventHandler,
        envelope: &Envelope,
        ctx: &mut DispatchContext<'_>,
        outcome: &mut DispatchOutcome,
    ) {
        outcome.handled += 1;
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(envelope, ctx)))
            .unwrap_or_else(|panic| {
                Err(EventError::HandlerExecution(format!(
                    "panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        if let Err(e) = result {
            outcome.failed += 1;
            error!("❌ Handler {} failed on {}: {}", handler.handler_name(), envelope.kind(), e);
        }
    }

    /// Dispatches one envelope taken off the inbound feed and answers the
    /// host if it asked for the outcome.
    pub(crate) fn deliver(&self, item: FeedItem, store: &StateStore, scheduler: &TaskScheduler) {
        let FeedItem { envelope, reply } = item;
        let outcome = self.dispatch(envelope, store, scheduler);
        if let Some(reply) = reply {
            // The host may have stopped waiting.
            let _ = reply.send(outcome);
        }
    }
}
