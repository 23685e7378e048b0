//! Permission nodes and the feature gates built on them.

use flats_core::{has_permission, EntityHandle, Permission, StateStore, StoreView};

pub const ADMIN: &str = "flats.admin";
pub const EDIT_FLATS: &str = "flats.edit";
pub const CLAIM_FLATS: &str = "flats.claim";
pub const SHOW_FLATS: &str = "flats.show";
pub const LIST_FLATS: &str = "flats.list";
pub const INFO_FLATS: &str = "flats.info";
pub const TRUST_PLAYERS: &str = "flats.trust";
pub const SKIP_COMMAND_DELAY: &str = "flats.skip_command_delay";

/// A gated feature of the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Edit,
    Claim,
    Show,
    List,
    Info,
    Trust,
    SkipCommandDelay,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Edit,
        Feature::Claim,
        Feature::Show,
        Feature::List,
        Feature::Info,
        Feature::Trust,
        Feature::SkipCommandDelay,
    ];

    /// The node that grants this feature under advanced permissions.
    pub fn node(self) -> &'static str {
        match self {
            Feature::Edit => EDIT_FLATS,
            Feature::Claim => CLAIM_FLATS,
            Feature::Show => SHOW_FLATS,
            Feature::List => LIST_FLATS,
            Feature::Info => INFO_FLATS,
            Feature::Trust => TRUST_PLAYERS,
            Feature::SkipCommandDelay => SKIP_COMMAND_DELAY,
        }
    }

    /// Whether the feature is open to everybody with simple permissions.
    fn open_by_default(self) -> bool {
        matches!(self, Feature::Claim | Feature::Show | Feature::Info | Feature::Trust)
    }
}

/// Resolves features against a player's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    advanced: bool,
}

impl Permissions {
    pub fn new(advanced: bool) -> Self {
        Self { advanced }
    }

    pub fn is_admin(store: StoreView<'_>, player: EntityHandle) -> bool {
        has_permission(store, player, ADMIN)
    }

    pub fn allows(&self, store: StoreView<'_>, player: EntityHandle, feature: Feature) -> bool {
        if self.advanced {
            has_permission(store, player, feature.node())
        } else {
            feature.open_by_default() || Self::is_admin(store, player)
        }
    }

    /// True when the player may use none of the features behind `/flats`.
    pub fn has_none(&self, store: StoreView<'_>, player: EntityHandle) -> bool {
        !Self::is_admin(store, player)
            && Feature::ALL
                .iter()
                .filter(|f| **f != Feature::SkipCommandDelay)
                .all(|f| !self.allows(store, player, *f))
    }

    /// A command permission gating on `feature`.
    pub fn gate(self, feature: Feature) -> Permission {
        Permission::predicate(feature.node(), move |player: EntityHandle, store: &StateStore| {
            self.allows(store.view(), player, feature)
        })
    }

    /// The gate of the `/flats` root: any usable feature.
    pub fn any(self) -> Permission {
        Permission::predicate("flats.*", move |player: EntityHandle, store: &StateStore| {
            !self.has_none(store.view(), player)
        })
    }
}
