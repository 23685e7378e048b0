//! Outbound calls from the plugin into the game host.

use crate::settings::GameMode;
use flats_core::{BlockPos, EntityHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// An item the plugin hands to players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: String,
    pub display_name: String,
}

impl ItemStack {
    /// The stick used to select area corners.
    pub fn selection_wand() -> Self {
        Self {
            material: "stick".to_string(),
            display_name: "Selection".to_string(),
        }
    }

    pub fn is_selection_wand(&self) -> bool {
        *self == Self::selection_wand()
    }
}

/// Block shown in place of area outlines by `/flats show`.
pub const HIGHLIGHT_BLOCK: &str = "yellow_stained_glass";

/// Everything the plugin asks the host to do.
///
/// Calls happen on the tick thread; implementations queue or forward them
/// without blocking.
pub trait HostGateway: Send + Sync {
    fn send_message(&self, player: EntityHandle, message: &str);

    fn set_game_mode(&self, player: EntityHandle, mode: GameMode);

    fn give_item(&self, player: EntityHandle, item: &ItemStack);

    /// Shows `material` at `blocks` to this player only.
    fn send_block_changes(&self, player: EntityHandle, blocks: &[BlockPos], material: &str);

    /// Re-sends the real blocks at `blocks` to this player.
    fn restore_blocks(&self, player: EntityHandle, blocks: &[BlockPos]);
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Message(EntityHandle, String),
    GameMode(EntityHandle, GameMode),
    GiveItem(EntityHandle, ItemStack),
    BlockChanges(EntityHandle, Vec<BlockPos>, String),
    RestoreBlocks(EntityHandle, Vec<BlockPos>),
}

/// Gateway that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn take(&self) -> Vec<HostCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn messages_to(&self, player: EntityHandle) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::Message(p, m) if *p == player => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn game_modes_of(&self, player: EntityHandle) -> Vec<GameMode> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HostCall::GameMode(p, mode) if *p == player => Some(*mode),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().push(call);
    }
}

impl HostGateway for RecordingHost {
    fn send_message(&self, player: EntityHandle, message: &str) {
        self.record(HostCall::Message(player, message.to_string()));
    }

    fn set_game_mode(&self, player: EntityHandle, mode: GameMode) {
        self.record(HostCall::GameMode(player, mode));
    }

    fn give_item(&self, player: EntityHandle, item: &ItemStack) {
        self.record(HostCall::GiveItem(player, item.clone()));
    }

    fn send_block_changes(&self, player: EntityHandle, blocks: &[BlockPos], material: &str) {
        self.record(HostCall::BlockChanges(player, blocks.to_vec(), material.to_string()));
    }

    fn restore_blocks(&self, player: EntityHandle, blocks: &[BlockPos]) {
        self.record(HostCall::RestoreBlocks(player, blocks.to_vec()));
    }
}
