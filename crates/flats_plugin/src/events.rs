//! Payloads of the host events the plugin listens to, and of the event it fires.
//!
//! The acting entity of an event travels as the envelope's first source. A
//! missing or non-player source means the actor is not a player.

use crate::host::ItemStack;
use flats_core::{BlockPos, EventKind};
use serde::{Deserialize, Serialize};

/// Plugin event fired when a player crosses a flat boundary.
pub const FLAT_ENTERED_OR_LEFT: &str = "flats:flat_entered_or_left";

pub fn flat_entered_or_left() -> EventKind {
    EventKind::plugin(FLAT_ENTERED_OR_LEFT)
}

/// Record keys the plugin keeps on players and worlds.
pub mod keys {
    pub const POSITION: &str = "position";
    pub const WORLD: &str = "world";
    /// Name of the flat a player currently stands in.
    pub const CURRENT_FLAT: &str = "flats.current_flat";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub op: bool,
    pub position: BlockPos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMoved {
    pub to: BlockPos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerChangedWorld {
    pub from: String,
    pub position: BlockPos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractAction {
    LeftClickBlock,
    RightClickBlock,
    LeftClickAir,
    RightClickAir,
    Physical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInteract {
    pub action: InteractAction,
    #[serde(default)]
    pub item: Option<ItemStack>,
    #[serde(default)]
    pub clicked_block: Option<BlockPos>,
    #[serde(default)]
    pub interaction_point: Option<BlockPos>,
}

/// A block broken, placed or changed by the envelope's actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub block: BlockPos,
}

/// An entity (or hanging entity) hurt or broken by the envelope's actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub location: BlockPos,
}

/// Blocks an explosion is about to destroy. Handlers amend `blocks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explosion {
    pub blocks: Vec<BlockPos>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatEnteredOrLeft {
    pub flat: String,
    pub entered: bool,
}
