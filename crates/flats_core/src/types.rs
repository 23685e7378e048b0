//! # Core Type Definitions
//!
//! The building blocks shared by every component of the dispatch core:
//! entity handles, the logical clock, block positions and typed attribute
//! values.
//!
//! ## Key Types
//!
//! - [`EntityHandle`] - Stable identifier for a player or world session
//! - [`TickClock`] - Shared logical clock advanced by the tick loop
//! - [`BlockPos`] - Integer block coordinates inside a named world
//! - [`AttrValue`] - Typed value stored in a state record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// One discrete step of the host server's logical clock.
pub type Tick = u64;

/// Host ticks per real second.
pub const TICKS_PER_SECOND: u64 = 20;

// ============================================================================
// Entity handles
// ============================================================================

/// The kind of entity a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    World,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Player => write!(f, "player"),
            EntityKind::World => write!(f, "world"),
        }
    }
}

/// Opaque identifier for a player or world.
///
/// Handles are stable for the lifetime of the host session. Components look
/// records up by handle; nobody owns a record through its handle.
///
/// # Examples
///
/// ```rust
/// use flats_core::EntityHandle;
///
/// let player = EntityHandle::new_player();
/// assert!(player.is_player());
/// println!("{player}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityHandle {
    /// Handle for the player with the given UUID.
    pub fn player(id: Uuid) -> Self {
        Self { kind: EntityKind::Player, id }
    }

    /// Handle for the world with the given UUID.
    pub fn world(id: Uuid) -> Self {
        Self { kind: EntityKind::World, id }
    }

    /// Creates a handle for a fresh random player id (UUID v4).
    pub fn new_player() -> Self {
        Self::player(Uuid::new_v4())
    }

    /// Creates a handle for a fresh random world id (UUID v4).
    pub fn new_world() -> Self {
        Self::world(Uuid::new_v4())
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }

    pub fn is_world(&self) -> bool {
        self.kind == EntityKind::World
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ============================================================================
// Logical clock
// ============================================================================

/// Shared logical clock.
///
/// Only the tick loop advances it; every other component reads it. Cloning
/// yields another view of the same clock.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    current: Arc<AtomicU64>,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tick currently being processed (0 before the first tick).
    pub fn now(&self) -> Tick {
        self.current.load(Ordering::Acquire)
    }

    /// Advances the clock by one tick and returns the new tick.
    pub(crate) fn advance(&self) -> Tick {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Integer block coordinates inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self { world: world.into(), x, y, z }
    }

    /// Coordinates without the world name, formatted `x,y,z`.
    pub fn coords(&self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.world, self.coords())
    }
}

// ============================================================================
// Attribute values
// ============================================================================

/// Typed value stored under a key in a state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Handle(EntityHandle),
    Position(BlockPos),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<EntityHandle> {
        match self {
            AttrValue::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_position(&self) -> Option<&BlockPos> {
        match self {
            AttrValue::Position(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Text(_) => "text",
            AttrValue::Handle(_) => "handle",
            AttrValue::Position(_) => "position",
            AttrValue::List(_) => "list",
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<EntityHandle> for AttrValue {
    fn from(v: EntityHandle) -> Self {
        AttrValue::Handle(v)
    }
}

impl From<BlockPos> for AttrValue {
    fn from(v: BlockPos) -> Self {
        AttrValue::Position(v)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(v: Vec<T>) -> Self {
        AttrValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Attribute keys the core itself understands.
///
/// The join path is expected to record these so permission predicates and
/// player-name argument resolution work.
pub mod attrs {
    /// Display name of a player or world (`Text`).
    pub const NAME: &str = "name";
    /// Granted permission nodes (`List` of `Text`).
    pub const PERMISSIONS: &str = "permissions";
    /// Operator flag; operators hold every permission node (`Bool`).
    pub const OPERATOR: &str = "op";
}
