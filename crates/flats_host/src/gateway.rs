//! Host gateway that prints what the plugin asks of the game to the log.

use flats_core::{attrs, BlockPos, EntityHandle, StateStore};
use flats_plugin::{GameMode, HostGateway, ItemStack};
use std::sync::Arc;
use tracing::info;

pub struct ConsoleHost {
    store: Arc<StateStore>,
}

impl ConsoleHost {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// The player's name while they are online, else their handle.
    fn display_name(&self, player: EntityHandle) -> String {
        self.store
            .get(player, attrs::NAME)
            .ok()
            .flatten()
            .and_then(|name| name.as_text().map(str::to_string))
            .unwrap_or_else(|| player.to_string())
    }
}

impl HostGateway for ConsoleHost {
    fn send_message(&self, player: EntityHandle, message: &str) {
        info!("💬 [{}] {}", self.display_name(player), message);
    }

    fn set_game_mode(&self, player: EntityHandle, mode: GameMode) {
        info!("🎮 [{}] game mode set to {}", self.display_name(player), mode);
    }

    fn give_item(&self, player: EntityHandle, item: &ItemStack) {
        info!(
            "🎁 [{}] received {} ({})",
            self.display_name(player),
            item.display_name,
            item.material
        );
    }

    fn send_block_changes(&self, player: EntityHandle, blocks: &[BlockPos], material: &str) {
        info!(
            "✨ [{}] {} block(s) shown as {}",
            self.display_name(player),
            blocks.len(),
            material
        );
    }

    fn restore_blocks(&self, player: EntityHandle, blocks: &[BlockPos]) {
        info!("🧱 [{}] {} block(s) restored", self.display_name(player), blocks.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flats_core::AttrValue;

    #[test]
    fn names_online_players() {
        let store = Arc::new(StateStore::new());
        let steve = EntityHandle::new_player();
        store
            .create_with(steve, [(attrs::NAME, AttrValue::from("Steve"))])
            .unwrap();
        let host = ConsoleHost::new(store.clone());

        assert_eq!(host.display_name(steve), "Steve");

        let stranger = EntityHandle::new_player();
        assert_eq!(host.display_name(stranger), stranger.to_string());
    }
}
