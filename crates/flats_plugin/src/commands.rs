//! The `/flats` command tree.

use crate::cache::{grid_cells, MAX_AREA_CELLS};
use crate::context::FlatsContext;
use crate::host::{ItemStack, HIGHLIGHT_BLOCK};
use crate::i18n::{I18n, PREFIX};
use crate::permissions::Feature;
use crate::schedulers::{remaining_delay, start_delay};
use crate::volumes::{Area, Flat, Selection};
use flats_core::commands::online_player_names;
use flats_core::{
    ArgSpec, BlockPos, CommandContext, CommandDispatcher, CommandError, CommandOutput, CommandResult,
    CommandSpec, EntityHandle, ErrorClass, StateStore, StoreView, Task, TICKS_PER_SECOND,
};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ROOT: &str = "flats";
/// Key under which `/flats show` keeps its cooldown.
pub const SHOW_COMMAND: &str = "flats show";
pub const SHOW_TASK: &str = "flats-show";
pub const SHOW_RESTORE_TASK: &str = "flats-show-restore";
/// How long highlighted outlines stay, and how long `/flats show` cools down.
pub const SHOW_SECONDS: u64 = 10;
/// Areas further than this from the player are not highlighted.
pub const SHOW_RANGE: i32 = 100;
pub const MAX_BLOCK_UPDATES_PER_TICK: usize = 100;

/// Registers `/flats` and its subcommands.
pub fn register(dispatcher: &CommandDispatcher, ctx: &Arc<FlatsContext>) {
    let perms = ctx.permissions;

    let flats = ctx.clone();
    dispatcher.register(
        ROOT,
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| {
            Ok(help(&flats, cmd.store(), cmd.requester()))
        })
        .arg(ArgSpec::text("args").optional())
        .permission(perms.any()),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats select",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| select(&flats, cmd))
            .permission(perms.gate(Feature::Edit)),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats add",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| add(&flats, cmd))
            .arg(ArgSpec::word("name"))
            .permission(perms.gate(Feature::Edit)),
    );

    let flats = ctx.clone();
    let names = ctx.clone();
    dispatcher.register(
        "flats remove",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| remove(&flats, cmd))
            .arg(ArgSpec::word("name"))
            .permission(perms.gate(Feature::Edit))
            .completer(move |_, _, args: &[String]| match args {
                [partial] => names
                    .cache
                    .read()
                    .names()
                    .into_iter()
                    .filter(|name| name.to_lowercase().starts_with(&partial.to_lowercase()))
                    .collect(),
                _ => Vec::new(),
            }),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats claim",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| claim(&flats, cmd))
            .permission(perms.gate(Feature::Claim)),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats unclaim",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| unclaim(&flats, cmd))
            .permission(perms.gate(Feature::Claim)),
    );

    for (path, trusting) in [("flats trust", true), ("flats untrust", false)] {
        let flats = ctx.clone();
        dispatcher.register(
            path,
            CommandSpec::new(move |cmd: &mut CommandContext<'_>| trust(&flats, cmd, trusting))
                .arg(ArgSpec::word("player"))
                .permission(perms.gate(Feature::Trust))
                .completer(|_, store: &StateStore, args: &[String]| match args {
                    [partial] => online_player_names(store, partial),
                    _ => Vec::new(),
                }),
        );
    }

    let flats = ctx.clone();
    dispatcher.register(
        "flats info",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| info(&flats, cmd))
            .permission(perms.gate(Feature::Info)),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats list",
        CommandSpec::new(move |_: &mut CommandContext<'_>| list(&flats))
            .permission(perms.gate(Feature::List)),
    );

    let flats = ctx.clone();
    dispatcher.register(
        "flats show",
        CommandSpec::new(move |cmd: &mut CommandContext<'_>| show(&flats, cmd))
            .permission(perms.gate(Feature::Show)),
    );

    info!("📝 Registered /{} and its subcommands", ROOT);
}

/// Lines to show the requester for a command result.
pub fn reply_lines(i18n: &I18n, result: &CommandResult<CommandOutput>) -> Vec<String> {
    let error = match result {
        Ok(output) => return output.messages().to_vec(),
        Err(error) => error,
    };
    match error {
        CommandError::PermissionDenied { .. } => vec![i18n.message("error.no_permission", &[])],
        CommandError::Usage { usage } => vec![i18n.message("error.usage", &[usage])],
        CommandError::PlayerNotFound(name) => vec![i18n.message("error.player_not_found", &[name])],
        CommandError::Rejected(message) => message.lines().map(str::to_string).collect(),
        CommandError::Help(lines) => lines.clone(),
        other => match other.class() {
            ErrorClass::ConsistencyViolation | ErrorClass::TransientTask => {
                vec![i18n.message("error.internal", &[])]
            }
            _ => vec![format!("{}{}", PREFIX, other.user_message())],
        },
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn refuse(flats: &FlatsContext, key: &str, args: &[&dyn Display]) -> CommandError {
    CommandError::Rejected(flats.i18n.message(key, args))
}

fn reply(flats: &FlatsContext, key: &str, args: &[&dyn Display]) -> CommandOutput {
    CommandOutput::message(flats.i18n.message(key, args))
}

fn position(flats: &FlatsContext, cmd: &CommandContext<'_>) -> CommandResult<BlockPos> {
    FlatsContext::position_of(cmd.store(), cmd.requester()).ok_or_else(|| refuse(flats, "error.not_in_flat", &[]))
}

/// Name of the flat the requester stands in.
fn current_flat(flats: &FlatsContext, cmd: &CommandContext<'_>) -> CommandResult<String> {
    let pos = position(flats, cmd)?;
    flats
        .cache
        .read()
        .flat_name_at(&pos)
        .ok_or_else(|| refuse(flats, "error.not_in_flat", &[]))
}

/// Name of the flat the requester stands in and owns.
fn owned_flat(flats: &FlatsContext, cmd: &CommandContext<'_>) -> CommandResult<String> {
    let name = current_flat(flats, cmd)?;
    let owner = cmd.requester().id;
    if flats.cache.read().get(&name).is_some_and(|flat| flat.is_owner(owner)) {
        Ok(name)
    } else {
        Err(refuse(flats, "error.not_your_flat", &[]))
    }
}

fn missing_flat(name: &str) -> CommandError {
    CommandError::Internal(format!("flat '{}' vanished from the cache", name))
}

// ============================================================================
// Subcommands
// ============================================================================

fn help(flats: &FlatsContext, store: StoreView<'_>, player: EntityHandle) -> CommandOutput {
    let allows = |feature| flats.permissions.allows(store, player, feature);
    let sections: [(Feature, &[&str]); 6] = [
        (Feature::Edit, &["help.select", "help.add", "help.remove"]),
        (Feature::List, &["help.list"]),
        (Feature::Info, &["help.info"]),
        (Feature::Claim, &["help.claim", "help.unclaim"]),
        (Feature::Trust, &["help.trust", "help.untrust"]),
        (Feature::Show, &["help.show"]),
    ];

    let mut output = reply(flats, "help.header", &[]);
    for (feature, keys) in sections {
        if allows(feature) {
            for key in keys {
                output.push(flats.i18n.translate(key, &[]));
            }
        }
    }
    output
}

fn select(flats: &FlatsContext, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    flats.host.give_item(cmd.requester(), &ItemStack::selection_wand());
    Ok(reply(flats, "select.success", &[]))
}

fn add(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let name = cmd.args().word("name").unwrap_or_default().to_string();
    let selection = Selection::load(cmd.store(), cmd.requester())?;

    let volume = selection.volume();
    if volume == 0 {
        return Err(refuse(flats, "error.nothing_selected", &[]));
    }
    if volume > flats.settings.max_flat_size {
        return Err(refuse(flats, "error.selection_too_large", &[]));
    }
    let area = Area::from_selection(&selection, name.as_str())
        .ok_or_else(|| refuse(flats, "error.nothing_selected", &[]))?;
    if grid_cells(&area) > MAX_AREA_CELLS {
        return Err(refuse(flats, "error.selection_too_large", &[]));
    }

    let key = {
        let cache = flats.cache.read();
        if let Some(hit) = cache.all_areas().find(|existing| selection.intersects(existing)) {
            let lines = [
                flats.i18n.message("error.flat_intersect", &[]),
                flats.i18n.message(
                    "error.flat_intersect.details",
                    &[&hit.flat_name(), &hit.location_string()],
                ),
            ];
            return Err(CommandError::Rejected(lines.join("\n")));
        }
        if cache.exists(&name) {
            "add.area_added"
        } else {
            "add.success"
        }
    };

    let staged = flats.clone();
    let requester = cmd.requester();
    let flat_name = name.clone();
    cmd.on_commit(move || {
        let mut cache = staged.cache.write();
        let added = if cache.exists(&flat_name) {
            cache.add_area(&flat_name, area)
        } else {
            cache.create(&flat_name, area)
        };
        match added {
            Ok(()) => debug!("{} added an area to flat {}", requester, flat_name),
            Err(e) => warn!("⚠️ Could not add an area to flat {}: {}", flat_name, e),
        }
    });
    Ok(reply(flats, key, &[&name]))
}

fn remove(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let name = cmd.args().word("name").unwrap_or_default().to_string();
    if !flats.cache.read().exists(&name) {
        return Err(refuse(flats, "error.flat_not_exist", &[]));
    }

    let staged = flats.clone();
    let requester = cmd.requester();
    let flat_name = name.clone();
    cmd.on_commit(move || match staged.cache.write().delete(&flat_name) {
        Ok(_) => info!("🗑️ {} deleted flat {}", requester, flat_name),
        Err(e) => warn!("⚠️ Could not delete flat {}: {}", flat_name, e),
    });
    Ok(reply(flats, "remove.success", &[&name]))
}

/// Applies `change` to a flat once the command commits.
fn change_flat_on_commit(
    flats: &Arc<FlatsContext>,
    cmd: &mut CommandContext<'_>,
    name: String,
    change: impl FnOnce(&mut Flat) + 'static,
) {
    let staged = flats.clone();
    cmd.on_commit(move || match staged.cache.write().get_mut(&name) {
        Some(flat) => change(flat),
        None => warn!("⚠️ Flat {} vanished before a change could be applied", name),
    });
}

fn claim(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let player = cmd.requester();
    let name = current_flat(flats, cmd)?;
    let is_admin = FlatsContext::is_admin(cmd.store(), player);

    {
        let cache = flats.cache.read();
        let owned = cache.owned_count(player.id);
        let flat = cache.get(&name).ok_or_else(|| missing_flat(&name))?;
        if flat.is_owner(player.id) {
            return Err(refuse(flats, "claim.already_your_flat", &[]));
        }
        if let Some(owner) = flat.owner() {
            let owner = flats.known_players.name_of(owner);
            return Err(refuse(flats, "claim.already_owned_by", &[&owner]));
        }
        let max = flats.settings.max_claimable_flats;
        if !is_admin && owned >= max {
            return Err(refuse(flats, "claim.max_claimable_flats_reached", &[&max]));
        }
    }

    debug!("{} claims flat {}", player, name);
    change_flat_on_commit(flats, cmd, name, move |flat| flat.set_owner(player.id));
    Ok(reply(flats, "claim.success", &[]))
}

fn unclaim(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let name = owned_flat(flats, cmd)?;
    debug!("{} unclaims flat {}", cmd.requester(), name);
    change_flat_on_commit(flats, cmd, name, Flat::unclaim);
    Ok(reply(flats, "unclaim.success", &[]))
}

fn trust(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>, trusting: bool) -> CommandResult<CommandOutput> {
    let name = owned_flat(flats, cmd)?;
    let wanted = cmd.args().word("player").unwrap_or_default();
    let (target, target_name) = flats
        .known_players
        .find(wanted)
        .ok_or_else(|| CommandError::PlayerNotFound(wanted.to_string()))?;

    let already = flats
        .cache
        .read()
        .get(&name)
        .ok_or_else(|| missing_flat(&name))?
        .is_trusted(target);
    let (changes, done, unchanged) = if trusting {
        (!already, "trust.success", "trust.already_trusted")
    } else {
        (already, "untrust.success", "untrust.not_trusted")
    };
    if !changes {
        return Err(refuse(flats, unchanged, &[&target_name]));
    }

    change_flat_on_commit(flats, cmd, name, move |flat| {
        if trusting {
            flat.add_trusted(target);
        } else {
            flat.remove_trusted(target);
        }
    });
    Ok(reply(flats, done, &[&target_name]))
}

fn info(flats: &FlatsContext, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let pos = position(flats, cmd)?;
    let cache = flats.cache.read();
    let Some(flat) = cache.flat_at(&pos) else {
        return Err(refuse(flats, "error.not_in_flat", &[]));
    };
    let i18n = &flats.i18n;

    let mut output = reply(flats, "info.flat", &[&flat.name()]);
    match flat.owner() {
        Some(owner) => output.push(i18n.message("info.owner", &[&flats.known_players.name_of(owner)])),
        None => output.push(i18n.message("info.unoccupied", &[])),
    }
    if let Some((last, rest)) = flat.trusted().split_last() {
        output.push(i18n.message("info.trusted_header", &[]));
        for id in rest {
            output.push(i18n.message("info.trusted_item", &[&flats.known_players.name_of(*id)]));
        }
        output.push(i18n.message("info.trusted_last", &[&flats.known_players.name_of(*last)]));
    }
    if let Some(area) = flat.areas().iter().find(|area| area.contains(&pos)) {
        output.push(i18n.message("info.area", &[&area.location_string()]));
    }
    Ok(output)
}

fn list(flats: &FlatsContext) -> CommandResult<CommandOutput> {
    let cache = flats.cache.read();
    if cache.is_empty() {
        return Ok(reply(flats, "list.empty", &[]));
    }
    let i18n = &flats.i18n;

    let mut output = reply(flats, "list.title", &[]);
    for flat in cache.flats() {
        output.push(i18n.message("info.flat", &[&flat.name()]));
        match flat.owner() {
            Some(owner) => output.push(i18n.message("info.owner", &[&flats.known_players.name_of(owner)])),
            None => output.push(i18n.message("info.unoccupied", &[])),
        }
        output.push(i18n.message("list.areas_header", &[]));
        if let Some((last, rest)) = flat.areas().split_last() {
            for area in rest {
                output.push(i18n.message("list.areas_item", &[&area.location_string()]));
            }
            output.push(i18n.message("list.areas_last", &[&last.location_string()]));
        }
    }
    Ok(output)
}

fn show(flats: &Arc<FlatsContext>, cmd: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
    let player = cmd.requester();
    if let Some(ticks) = remaining_delay(cmd.store(), player, SHOW_COMMAND, cmd.tick()) {
        let seconds = ticks.div_ceil(TICKS_PER_SECOND);
        return Err(refuse(flats, "error.command_delay", &[&seconds]));
    }
    if !flats.permissions.allows(cmd.store(), player, Feature::SkipCommandDelay) {
        start_delay(cmd, SHOW_COMMAND, SHOW_SECONDS)?;
    }

    let Some(pos) = FlatsContext::position_of(cmd.store(), player) else {
        return Ok(reply(flats, "show.none", &[]));
    };
    let (count, blocks) = {
        let cache = flats.cache.read();
        let nearby: Vec<&Area> = cache
            .all_areas()
            .filter(|area| area.is_within_distance(&pos, SHOW_RANGE))
            .collect();
        let blocks: Vec<BlockPos> = nearby.iter().flat_map(|area| area.outer_blocks()).collect();
        (nearby.len(), blocks)
    };

    let output = match count {
        0 => return Ok(reply(flats, "show.none", &[])),
        1 => reply(flats, "show.success.singular", &[&SHOW_SECONDS]),
        n => reply(flats, "show.success.plural", &[&n, &SHOW_SECONDS]),
    };
    cmd.defer(highlight(flats.clone(), player, blocks));
    Ok(output)
}

/// Sends the outline blocks in per-tick batches, then schedules their restore.
fn highlight(flats: Arc<FlatsContext>, player: EntityHandle, blocks: Vec<BlockPos>) -> Task {
    let mut blocks = blocks;
    let mut sent = 0;
    Task::repeating(1, move |run| {
        if sent >= blocks.len() {
            run.stop();
            let shown = std::mem::take(&mut blocks);
            let host = flats.host.clone();
            run.scheduler().submit(
                Task::once(SHOW_SECONDS * TICKS_PER_SECOND, move |_| {
                    host.restore_blocks(player, &shown);
                    Ok(())
                })
                .named(SHOW_RESTORE_TASK)
                .owned_by(player),
            )?;
            return Ok(());
        }
        let end = (sent + MAX_BLOCK_UPDATES_PER_TICK).min(blocks.len());
        flats.host.send_block_changes(player, &blocks[sent..end], HIGHLIGHT_BLOCK);
        sent = end;
        Ok(())
    })
    .after(0)
    .named(SHOW_TASK)
    .owned_by(player)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FlatsCache;
    use crate::context::register_validators;
    use crate::host::RecordingHost;
    use crate::i18n::I18n;
    use crate::settings::Settings;
    use crate::volumes::{SELECTION_POS1, SELECTION_POS2};
    use flats_core::{attrs, AttrValue, Core};

    #[test]
    fn core_errors_become_translated_replies() {
        let i18n = I18n::default();
        let denied: CommandResult<CommandOutput> = Err(CommandError::PermissionDenied {
            command: "flats add".to_string(),
        });
        assert_eq!(
            reply_lines(&i18n, &denied),
            vec!["[Flats] You do not have permission to do that.".to_string()]
        );

        let usage: CommandResult<CommandOutput> = Err(CommandError::Usage {
            usage: "/flats add <name>".to_string(),
        });
        assert_eq!(reply_lines(&i18n, &usage), vec!["[Flats] Usage: /flats add <name>".to_string()]);

        let rejected: CommandResult<CommandOutput> = Err(CommandError::Rejected("[Flats] a\n[Flats] b".to_string()));
        assert_eq!(reply_lines(&i18n, &rejected), vec!["[Flats] a", "[Flats] b"]);

        let internal: CommandResult<CommandOutput> = Err(CommandError::Internal("boom".to_string()));
        assert_eq!(
            reply_lines(&i18n, &internal),
            vec!["[Flats] Something went wrong. Please tell an administrator.".to_string()]
        );
    }

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn flats_change_only_when_the_command_commits() {
        let core = Core::default();
        register_validators(core.store());
        let flats = Arc::new(FlatsContext::new(
            Settings::default(),
            FlatsCache::new(),
            Arc::new(RecordingHost::new()),
        ));
        register(core.commands(), &flats);

        let admin = EntityHandle::new_player();
        core.store()
            .create_with(
                admin,
                [
                    (attrs::OPERATOR, AttrValue::from(true)),
                    (SELECTION_POS1, AttrValue::from(BlockPos::new("world", 0, 0, 0))),
                    (SELECTION_POS2, AttrValue::from(BlockPos::new("world", 4, 4, 4))),
                ],
            )
            .unwrap();
        let bystander = EntityHandle::new_player();
        core.store().create(bystander).unwrap();

        let ctx = flats.clone();
        core.commands().register(
            "add-then-fail",
            CommandSpec::new(move |cmd: &mut CommandContext<'_>| {
                add(&ctx, cmd)?;
                Err(CommandError::Rejected("later step failed".to_string()))
            })
            .arg(ArgSpec::word("name")),
        );
        let ctx = flats.clone();
        let store = core.store().clone();
        core.commands().register(
            "add-then-lose-record",
            CommandSpec::new(move |cmd: &mut CommandContext<'_>| {
                let output = add(&ctx, cmd)?;
                cmd.txn().set(bystander, "seen", true)?;
                store.remove(bystander)?;
                Ok(output)
            })
            .arg(ArgSpec::word("name")),
        );

        assert!(core.invoke(admin, "add-then-fail", &words("a1")).is_err());
        assert!(core.invoke(admin, "add-then-lose-record", &words("a1")).is_err());
        assert!(flats.cache.read().is_empty());

        core.invoke(admin, "flats", &words("add a1")).unwrap();
        assert!(flats.cache.read().exists("a1"));

        core.invoke(admin, "flats", &words("remove a1")).unwrap();
        assert!(flats.cache.read().is_empty());
    }
}
