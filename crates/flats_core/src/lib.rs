//! # Flats Core
//!
//! A tick-driven event and command dispatch core for game-server plugins.
//! It mediates between an unordered stream of host events, player commands
//! and plugin-managed state, all on the server's single logic thread.
//!
//! ## Components
//!
//! - [`StateStore`] - authoritative per-player and per-world state
//! - [`EventRouter`] - priority-ordered dispatch of host and plugin events
//! - [`TaskScheduler`] - deferred, periodic and out-of-band work on the tick clock
//! - [`CommandDispatcher`] - validated, transactional command invocations
//! - [`Core`] / [`TickLoop`] - wiring and the per-tick driver
//!
//! ## Quick Start
//!
//! ```rust
//! use flats_core::{AttrValue, Core, EntityHandle, EventKind, EventPriority, Envelope};
//! use serde_json::json;
//!
//! let core = Core::default();
//! let player = EntityHandle::new_player();
//! core.store().create_with(player, [("name", AttrValue::from("Alex"))]).unwrap();
//!
//! core.router().on(EventKind::BlockBreak, EventPriority::Normal, "deny", |_, ctx| {
//!     ctx.cancel();
//!     Ok(())
//! });
//!
//! let outcome = core.dispatch(Envelope::new(EventKind::BlockBreak, core.now(), json!({})));
//! assert!(outcome.cancelled);
//! ```

pub mod commands;
pub mod error;
pub mod event;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod tick;
pub mod types;

pub use commands::{
    has_permission, ArgKind, ArgSpec, ArgValue, CommandContext, CommandDescriptor, CommandDispatcher,
    CommandFeed, CommandHandler, CommandOutput, CommandSpec, InvocationReport, InvocationState,
    ParsedArgs, Permission,
};
pub use error::{
    CommandError, CommandResult, CoreError, ErrorClass, EventError, EventResult, StoreError,
    StoreResult, TaskError, TaskResult,
};
pub use event::{Envelope, EventFeed, EventKind};
pub use router::{
    DispatchContext, DispatchOutcome, EventHandler, EventPriority, EventRouter, FnEventHandler,
    RouterStats, SubscriptionId, TypedEventHandler,
};
pub use scheduler::{Task, TaskContext, TaskHandle, TaskScheduler, TaskState, TickRunReport};
pub use store::{Attributes, RemovalHook, StateRecord, StateStore, StoreView, Transaction};
pub use tick::{Core, CoreConfig, TickLoop, TickReport};
pub use types::{attrs, AttrValue, BlockPos, EntityHandle, EntityKind, Tick, TickClock, TICKS_PER_SECOND};
