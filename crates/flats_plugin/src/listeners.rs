//! Host event listeners: player sessions, flat boundaries, the selection wand
//! and flat protection.

use crate::context::FlatsContext;
use crate::events::{
    flat_entered_or_left, keys, BlockEvent, EntityEvent, Explosion, FlatEnteredOrLeft,
    InteractAction, PlayerChangedWorld, PlayerInteract, PlayerJoined, PlayerMoved, WorldEvent,
};
use crate::volumes::{Selection, SELECTION_POS1, SELECTION_POS2};
use flats_core::{
    attrs, AttrValue, BlockPos, DispatchContext, EntityHandle, Envelope, EventError, EventHandler,
    EventKind, EventPriority, EventResult, EventRouter, StoreError, SubscriptionId,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Subscribes every plugin listener. The returned ids undo the registration.
pub fn register(router: &EventRouter, ctx: &Arc<FlatsContext>) -> Vec<SubscriptionId> {
    let mut ids = Vec::new();
    ids.extend(register_session(router, ctx));
    ids.extend(register_movement(router, ctx));
    ids.push(register_wand(router, ctx));
    ids.extend(register_protection(router, ctx));
    debug!("Registered {} flats listener(s)", ids.len());
    ids
}

/// The acting player of an envelope, if the actor is a player.
fn acting_player(envelope: &Envelope) -> Option<EntityHandle> {
    envelope.source().filter(EntityHandle::is_player)
}

// ============================================================================
// Sessions
// ============================================================================

fn register_session(router: &EventRouter, ctx: &Arc<FlatsContext>) -> Vec<SubscriptionId> {
    let flats = ctx.clone();
    let join = router.on(
        EventKind::PlayerJoin,
        EventPriority::Highest,
        "flats:player_join",
        move |envelope, dispatch| {
            let Some(player) = acting_player(envelope) else {
                warn!("⚠️ Player join without a player source");
                return Ok(());
            };
            let joined: PlayerJoined = envelope.decode()?;
            let permissions = joined.permissions.iter().map(|n| AttrValue::from(n.as_str())).collect();
            dispatch.store().create_with(
                player,
                [
                    (attrs::NAME, AttrValue::from(joined.name.as_str())),
                    (attrs::PERMISSIONS, AttrValue::List(permissions)),
                    (attrs::OPERATOR, AttrValue::from(joined.op)),
                    (keys::WORLD, AttrValue::from(joined.position.world.as_str())),
                    (keys::POSITION, AttrValue::from(joined.position)),
                ],
            )?;
            flats.known_players.remember(player.id, &joined.name);
            Ok(())
        },
    );

    let quit = router.on(
        EventKind::PlayerQuit,
        EventPriority::Monitor,
        "flats:player_quit",
        |envelope, dispatch| {
            let Some(player) = acting_player(envelope) else {
                return Ok(());
            };
            match dispatch.store().remove(player) {
                Err(StoreError::NotFound(_)) => {
                    debug!("{} quit without a record", player);
                    Ok(())
                }
                other => other.map_err(EventError::from),
            }
        },
    );

    let world_load = router.on(
        EventKind::WorldLoad,
        EventPriority::Highest,
        "flats:world_load",
        |envelope, dispatch| {
            let Some(world) = envelope.source().filter(EntityHandle::is_world) else {
                return Ok(());
            };
            let event: WorldEvent = envelope.decode()?;
            dispatch
                .store()
                .create_with(world, [(attrs::NAME, AttrValue::from(event.name))])?;
            Ok(())
        },
    );

    let world_unload = router.on(
        EventKind::WorldUnload,
        EventPriority::Monitor,
        "flats:world_unload",
        |envelope, dispatch| {
            let Some(world) = envelope.source().filter(EntityHandle::is_world) else {
                return Ok(());
            };
            if dispatch.store().contains(world) {
                dispatch.store().remove(world)?;
            }
            Ok(())
        },
    );

    vec![join, quit, world_load, world_unload]
}

// ============================================================================
// Movement & flat boundaries
// ============================================================================

/// Records `to` as the player's position and returns the flat they stood in
/// before, paired with the flat they stand in now.
fn relocate(
    flats: &FlatsContext,
    dispatch: &DispatchContext<'_>,
    player: EntityHandle,
    to: BlockPos,
) -> EventResult<Option<(Option<String>, Option<String>)>> {
    let current = flats.cache.read().flat_name_at(&to);
    let world = to.world.clone();
    let updated = dispatch.store().update(player, |attrs| {
        attrs.insert(keys::POSITION.to_string(), AttrValue::from(to));
        attrs.insert(keys::WORLD.to_string(), AttrValue::from(world));
        let previous = match &current {
            Some(name) => attrs.insert(keys::CURRENT_FLAT.to_string(), AttrValue::from(name.as_str())),
            None => attrs.remove(keys::CURRENT_FLAT),
        };
        previous.and_then(|value| value.as_text().map(str::to_string))
    });
    match updated {
        Ok(previous) => Ok(Some((previous, current))),
        Err(StoreError::NotFound(_)) => {
            trace!("Ignoring movement of {} without a record", player);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn announce_transition(
    dispatch: &mut DispatchContext<'_>,
    player: EntityHandle,
    previous: Option<String>,
    current: Option<String>,
) -> EventResult<()> {
    if previous == current {
        return Ok(());
    }
    if let Some(flat) = previous {
        dispatch.emit_event(flat_entered_or_left(), [player], &FlatEnteredOrLeft { flat, entered: false })?;
    }
    if let Some(flat) = current {
        dispatch.emit_event(flat_entered_or_left(), [player], &FlatEnteredOrLeft { flat, entered: true })?;
    }
    Ok(())
}

fn register_movement(router: &EventRouter, ctx: &Arc<FlatsContext>) -> Vec<SubscriptionId> {
    let flats = ctx.clone();
    let moved = router.on(
        EventKind::PlayerMove,
        EventPriority::Normal,
        "flats:player_move",
        move |envelope, dispatch| {
            let Some(player) = acting_player(envelope) else {
                return Ok(());
            };
            let event: PlayerMoved = envelope.decode()?;
            if let Some((previous, current)) = relocate(&flats, dispatch, player, event.to)? {
                announce_transition(dispatch, player, previous, current)?;
            }
            Ok(())
        },
    );

    let flats = ctx.clone();
    let changed_world = router.on(
        EventKind::PlayerChangedWorld,
        EventPriority::Normal,
        "flats:player_changed_world",
        move |envelope, dispatch| {
            let Some(player) = acting_player(envelope) else {
                return Ok(());
            };
            let event: PlayerChangedWorld = envelope.decode()?;
            if !dispatch.store().contains(player) {
                return Ok(());
            }
            Selection::clear(dispatch.store(), player)?;
            debug!("Cleared selection of {} after leaving {}", player, event.from);
            if let Some((previous, current)) = relocate(&flats, dispatch, player, event.position)? {
                announce_transition(dispatch, player, previous, current)?;
            }
            Ok(())
        },
    );

    let flats = ctx.clone();
    let game_mode = router.on(
        flat_entered_or_left(),
        EventPriority::Normal,
        "flats:auto_gamemode",
        move |envelope, dispatch| {
            if !flats.settings.enable_auto_gamemode {
                return Ok(());
            }
            let Some(player) = acting_player(envelope) else {
                return Ok(());
            };
            if FlatsContext::is_admin(dispatch.store().view(), player) {
                return Ok(());
            }
            let event: FlatEnteredOrLeft = envelope.decode()?;
            let owns_it = flats
                .cache
                .read()
                .get(&event.flat)
                .is_some_and(|flat| flat.is_owner(player.id));
            let mode = if event.entered && owns_it {
                flats.settings.inside_flat_gamemode
            } else {
                flats.settings.outside_flat_gamemode
            };
            flats.host.set_game_mode(player, mode);
            Ok(())
        },
    );

    vec![moved, changed_world, game_mode]
}

// ============================================================================
// Selection wand
// ============================================================================

fn register_wand(router: &EventRouter, ctx: &Arc<FlatsContext>) -> SubscriptionId {
    let flats = ctx.clone();
    router.on(
        EventKind::PlayerInteract,
        EventPriority::High,
        "flats:selection_wand",
        move |envelope, dispatch| {
            let Some(player) = acting_player(envelope) else {
                return Ok(());
            };
            let event: PlayerInteract = envelope.decode()?;
            if !event.item.as_ref().is_some_and(|item| item.is_selection_wand()) {
                return Ok(());
            }
            if !FlatsContext::is_admin(dispatch.store().view(), player) {
                return Ok(());
            }

            dispatch.cancel();
            dispatch.consume();
            let (corner, key) = match event.action {
                InteractAction::LeftClickBlock => (1, SELECTION_POS1),
                InteractAction::RightClickBlock => (2, SELECTION_POS2),
                _ => return Ok(()),
            };
            let Some(block) = event.clicked_block else {
                return Ok(());
            };
            dispatch.store().set(player, key, block)?;
            let volume = Selection::load(dispatch.store().view(), player)?.volume();
            flats.tell(player, "selection.set", &[&corner, &volume]);
            Ok(())
        },
    )
}

// ============================================================================
// Protection
// ============================================================================

type Locator = fn(&Envelope) -> EventResult<Option<BlockPos>>;

/// Cancels an event whose location lies in a flat the actor may not touch.
struct ProtectionHandler {
    name: String,
    flats: Arc<FlatsContext>,
    locate: Locator,
}

impl EventHandler for ProtectionHandler {
    fn handle(&self, envelope: &Envelope, ctx: &mut DispatchContext<'_>) -> EventResult<()> {
        let Some(pos) = (self.locate)(envelope)? else {
            return Ok(());
        };
        if !self.flats.may_act_at(ctx.store().view(), envelope.source(), &pos) {
            trace!("Protected {} from {}", pos, envelope.kind());
            ctx.cancel();
        }
        Ok(())
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

fn block_location(envelope: &Envelope) -> EventResult<Option<BlockPos>> {
    Ok(Some(envelope.decode::<BlockEvent>()?.block))
}

fn entity_location(envelope: &Envelope) -> EventResult<Option<BlockPos>> {
    Ok(Some(envelope.decode::<EntityEvent>()?.location))
}

fn interact_location(envelope: &Envelope) -> EventResult<Option<BlockPos>> {
    let event: PlayerInteract = envelope.decode()?;
    Ok(event.clicked_block.or(event.interaction_point))
}

fn register_protection(router: &EventRouter, ctx: &Arc<FlatsContext>) -> Vec<SubscriptionId> {
    let guarded: [(EventKind, &str, Locator); 6] = [
        (EventKind::BlockBreak, "flats:protect_block_break", block_location),
        (EventKind::BlockPlace, "flats:protect_block_place", block_location),
        (EventKind::EntityChangeBlock, "flats:protect_entity_change_block", block_location),
        (EventKind::EntityDamageByEntity, "flats:protect_entity_damage", entity_location),
        (EventKind::HangingBreakByEntity, "flats:protect_hanging_break", entity_location),
        (EventKind::PlayerInteract, "flats:protect_interact", interact_location),
    ];

    let mut ids: Vec<SubscriptionId> = guarded
        .into_iter()
        .map(|(kind, name, locate)| {
            router.subscribe(
                kind,
                EventPriority::Normal,
                Arc::new(ProtectionHandler {
                    name: name.to_string(),
                    flats: ctx.clone(),
                    locate,
                }),
            )
        })
        .collect();

    for (kind, name) in [
        (EventKind::EntityExplode, "flats:protect_entity_explode"),
        (EventKind::BlockExplode, "flats:protect_block_explode"),
    ] {
        let flats = ctx.clone();
        ids.push(router.on(kind, EventPriority::Normal, name, move |envelope, dispatch| {
            let explosion: Explosion = envelope.decode()?;
            let before = explosion.blocks.len();
            let remaining: Vec<BlockPos> = {
                let cache = flats.cache.read();
                explosion
                    .blocks
                    .into_iter()
                    .filter(|block| cache.flat_at(block).is_none())
                    .collect()
            };
            if remaining.len() != before {
                trace!("Kept {} block(s) in flats out of an explosion", before - remaining.len());
                dispatch.amend("blocks", json!(remaining));
            }
            Ok(())
        }));
    }

    ids
}
