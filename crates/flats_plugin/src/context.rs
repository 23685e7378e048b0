//! State shared by the plugin's listeners, commands and schedulers.

use crate::cache::FlatsCache;
use crate::events::keys;
use crate::host::HostGateway;
use crate::i18n::I18n;
use crate::permissions::Permissions;
use crate::settings::Settings;
use dashmap::DashMap;
use flats_core::{AttrValue, BlockPos, EntityHandle, StateStore, StoreView};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Every player seen since the plugin was enabled, online or not.
#[derive(Debug, Default)]
pub struct KnownPlayers {
    by_name: DashMap<String, Uuid>,
    names: DashMap<Uuid, String>,
}

impl KnownPlayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, id: Uuid, name: &str) {
        if let Some(old) = self.names.insert(id, name.to_string()) {
            if !old.eq_ignore_ascii_case(name) {
                self.by_name.remove(&old.to_lowercase());
            }
        }
        self.by_name.insert(name.to_lowercase(), id);
    }

    /// Looks a player up by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<(Uuid, String)> {
        let id = *self.by_name.get(&name.to_lowercase())?;
        Some((id, self.name_of(id)))
    }

    /// The last known name, or the id itself for players never seen.
    pub fn name_of(&self, id: Uuid) -> String {
        self.names
            .get(&id)
            .map(|name| name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub struct FlatsContext {
    pub settings: Settings,
    pub permissions: Permissions,
    pub i18n: I18n,
    pub cache: RwLock<FlatsCache>,
    pub known_players: KnownPlayers,
    pub host: Arc<dyn HostGateway>,
}

impl std::fmt::Debug for FlatsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatsContext")
            .field("settings", &self.settings)
            .field("i18n", &self.i18n)
            .field("flats", &self.cache.read().len())
            .field("known_players", &self.known_players.len())
            .finish_non_exhaustive()
    }
}

impl FlatsContext {
    pub fn new(settings: Settings, cache: FlatsCache, host: Arc<dyn HostGateway>) -> Self {
        Self {
            permissions: Permissions::new(settings.advanced_permissions),
            i18n: I18n::load(&settings.language),
            settings,
            cache: RwLock::new(cache),
            known_players: KnownPlayers::new(),
            host,
        }
    }

    /// Sends a prefixed, translated message.
    pub fn tell(&self, player: EntityHandle, key: &str, args: &[&dyn std::fmt::Display]) {
        self.host.send_message(player, &self.i18n.message(key, args));
    }

    /// A player's last reported position.
    pub fn position_of(store: StoreView<'_>, player: EntityHandle) -> Option<BlockPos> {
        store
            .get(player, keys::POSITION)
            .ok()
            .flatten()
            .and_then(|value| value.as_position().cloned())
    }

    pub fn is_admin(store: StoreView<'_>, player: EntityHandle) -> bool {
        Permissions::is_admin(store, player)
    }

    /// Whether `actor` may change things inside the flat at `pos`.
    ///
    /// Outside any flat everything is allowed. Inside, only admins, the owner
    /// and trusted players are; a non-player actor never is.
    pub fn may_act_at(&self, store: StoreView<'_>, actor: Option<EntityHandle>, pos: &BlockPos) -> bool {
        let cache = self.cache.read();
        let Some(flat) = cache.flat_at(pos) else {
            return true;
        };
        match actor {
            Some(player) if player.is_player() => {
                Self::is_admin(store, player) || flat.is_owner(player.id) || flat.is_trusted(player.id)
            }
            _ => false,
        }
    }
}

/// Attribute checks registered on the shared store.
pub fn register_validators(store: &StateStore) {
    store.register_validator("flats.selection.*", |value| match value {
        AttrValue::Position(_) => Ok(()),
        other => Err(format!("expected a position, got {}", other.type_name())),
    });
    store.register_validator(keys::POSITION, |value| match value {
        AttrValue::Position(_) => Ok(()),
        other => Err(format!("expected a position, got {}", other.type_name())),
    });
    store.register_validator(keys::CURRENT_FLAT, |value| match value {
        AttrValue::Text(name) if !name.is_empty() => Ok(()),
        _ => Err("expected a flat name".to_string()),
    });
    store.register_validator("cooldown.*", |value| match value.as_int() {
        Some(tick) if tick >= 0 => Ok(()),
        _ => Err("expected an expiry tick".to_string()),
    });
}
