//! Event envelopes and the inbound event feed.
//!
//! The host normalizes each fired event into an [`Envelope`] and pushes it
//! through an [`EventFeed`] from whatever thread it is on. Events and queued
//! commands share one inbound queue, which the tick loop drains in delivery
//! order.

use crate::commands::QueuedCommand;
use crate::error::{EventError, EventResult};
use crate::router::DispatchOutcome;
use crate::types::{EntityHandle, Tick, TickClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Kinds of events the router can dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlayerJoin,
    PlayerQuit,
    PlayerMove,
    PlayerChangedWorld,
    PlayerInteract,
    BlockBreak,
    BlockPlace,
    EntityDamageByEntity,
    EntityChangeBlock,
    HangingBreakByEntity,
    EntityExplode,
    BlockExplode,
    WorldLoad,
    WorldUnload,
    /// Event fired by a plugin rather than the host.
    Plugin(String),
}

impl EventKind {
    pub fn plugin(name: impl Into<String>) -> Self {
        EventKind::Plugin(name.into())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Plugin(name) => write!(f, "plugin:{}", name),
            other => {
                let name = serde_json::to_value(other)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| format!("{:?}", other));
                write!(f, "core:{}", name)
            }
        }
    }
}

/// Immutable snapshot of one host or plugin event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    kind: EventKind,
    sources: Vec<EntityHandle>,
    tick: Tick,
    payload: Value,
}

impl Envelope {
    pub fn new(kind: EventKind, tick: Tick, payload: Value) -> Self {
        Self {
            kind,
            sources: Vec::new(),
            tick,
            payload,
        }
    }

    /// Builds an envelope whose payload is the serialized `event`.
    pub fn from_event<T: Serialize>(kind: EventKind, tick: Tick, event: &T) -> EventResult<Self> {
        let payload = serde_json::to_value(event).map_err(|e| EventError::Payload {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(kind, tick, payload))
    }

    pub fn with_source(mut self, source: EntityHandle) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = EntityHandle>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn sources(&self) -> &[EntityHandle] {
        &self.sources
    }

    /// The first source, usually the acting player.
    pub fn source(&self) -> Option<EntityHandle> {
        self.sources.first().copied()
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decodes the payload into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> EventResult<T> {
        T::deserialize(&self.payload).map_err(|e| EventError::Payload {
            kind: self.kind.to_string(),
            reason: e.to_string(),
        })
    }
}

pub(crate) struct FeedItem {
    pub(crate) envelope: Envelope,
    pub(crate) reply: Option<oneshot::Sender<DispatchOutcome>>,
}

/// One item the host handed to the core.
pub(crate) enum Inbound {
    Event(FeedItem),
    Command(QueuedCommand),
}

/// The single queue events and commands travel through, so that items the
/// host delivered in some order are processed in that order.
pub(crate) struct InboundQueue {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl InboundQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx) }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Inbound> {
        self.tx.clone()
    }

    /// Everything submitted so far, oldest first.
    pub(crate) fn drain(&self) -> Vec<Inbound> {
        let mut rx = self.rx.lock();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }
}

/// Thread-safe handle for pushing host events into the core.
///
/// Cloneable; every clone feeds the same core. Envelopes are stamped with
/// the tick during which they were submitted.
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<Inbound>,
    clock: TickClock,
}

impl EventFeed {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>, clock: TickClock) -> Self {
        Self { tx, clock }
    }

    pub fn submit(&self, envelope: Envelope) -> EventResult<()> {
        self.tx
            .send(Inbound::Event(FeedItem { envelope, reply: None }))
            .map_err(|_| EventError::FeedClosed)
    }

    /// Serializes `event` into an envelope and submits it.
    pub fn submit_event<T: Serialize>(
        &self,
        kind: EventKind,
        sources: impl IntoIterator<Item = EntityHandle>,
        event: &T,
    ) -> EventResult<()> {
        let envelope = Envelope::from_event(kind, self.clock.now(), event)?.with_sources(sources);
        self.submit(envelope)
    }

    /// Submits an envelope and returns a receiver for its dispatch outcome.
    ///
    /// The host uses this when it has to know whether the event was cancelled.
    pub fn request(&self, envelope: Envelope) -> EventResult<oneshot::Receiver<DispatchOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Event(FeedItem {
                envelope,
                reply: Some(reply),
            }))
            .map_err(|_| EventError::FeedClosed)?;
        Ok(rx)
    }

    /// Current tick of the clock this feed stamps envelopes with.
    pub fn now(&self) -> Tick {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Moved {
        x: i32,
    }

    #[test]
    fn kinds_display_with_namespace() {
        assert_eq!(EventKind::BlockBreak.to_string(), "core:block_break");
        assert_eq!(
            EventKind::plugin("flat_entered_or_left").to_string(),
            "plugin:flat_entered_or_left"
        );
    }

    #[test]
    fn decode_reports_kind_on_bad_payload() {
        let envelope = Envelope::new(EventKind::PlayerMove, 3, json!({ "x": "east" }));
        let err = envelope.decode::<Moved>().unwrap_err();
        assert!(matches!(err, EventError::Payload { ref kind, .. } if kind == "core:player_move"));

        let ok = Envelope::new(EventKind::PlayerMove, 3, json!({ "x": 7 }));
        assert_eq!(ok.decode::<Moved>().unwrap(), Moved { x: 7 });
    }

    #[test]
    fn first_source_is_primary() {
        let a = EntityHandle::new_player();
        let b = EntityHandle::new_player();
        let envelope = Envelope::new(EventKind::EntityDamageByEntity, 0, Value::Null)
            .with_source(a)
            .with_source(b);
        assert_eq!(envelope.source(), Some(a));
        assert_eq!(envelope.sources(), &[a, b]);
    }
}
