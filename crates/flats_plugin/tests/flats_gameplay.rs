//! The plugin driven through a core the way a server would: join events,
//! wand clicks, `/flats` commands and protected block events.

use flats_core::{BlockPos, Core, EntityHandle, Envelope, EventKind};
use flats_plugin::events::{BlockEvent, InteractAction, PlayerInteract, PlayerJoined, PlayerMoved};
use flats_plugin::host::HostCall;
use flats_plugin::{FlatsPlugin, GameMode, ItemStack, RecordingHost};
use serde::Serialize;
use std::sync::Arc;
use tempfile::TempDir;

struct Server {
    core: Core,
    host: Arc<RecordingHost>,
    plugin: FlatsPlugin,
    dir: TempDir,
}

impl Server {
    async fn start(settings: &str) -> Self {
        let dir = TempDir::new().unwrap();
        Self::start_in(dir, settings).await
    }

    async fn start_in(dir: TempDir, settings: &str) -> Self {
        if !settings.is_empty() {
            std::fs::write(dir.path().join("settings.toml"), settings).unwrap();
        }
        let core = Core::default();
        let host = Arc::new(RecordingHost::new());
        let plugin = FlatsPlugin::enable(&core, dir.path(), host.clone()).await.unwrap();
        Self { core, host, plugin, dir }
    }

    fn send<T: Serialize>(&self, kind: EventKind, source: Option<EntityHandle>, event: &T) -> flats_core::DispatchOutcome {
        let mut envelope = Envelope::from_event(kind, self.core.now(), event).unwrap();
        if let Some(source) = source {
            envelope = envelope.with_source(source);
        }
        self.core.dispatch(envelope)
    }

    fn join(&self, name: &str, op: bool) -> EntityHandle {
        let player = EntityHandle::new_player();
        let joined = PlayerJoined {
            name: name.to_string(),
            permissions: Vec::new(),
            op,
            position: pos(100, 64, 100),
        };
        self.send(EventKind::PlayerJoin, Some(player), &joined);
        player
    }

    fn move_to(&self, player: EntityHandle, to: BlockPos) {
        self.send(EventKind::PlayerMove, Some(player), &PlayerMoved { to });
    }

    fn click(&self, player: EntityHandle, action: InteractAction, block: BlockPos) {
        let event = PlayerInteract {
            action,
            item: Some(ItemStack::selection_wand()),
            clicked_block: Some(block),
            interaction_point: None,
        };
        self.send(EventKind::PlayerInteract, Some(player), &event);
    }

    fn select(&self, admin: EntityHandle, from: BlockPos, to: BlockPos) {
        self.click(admin, InteractAction::LeftClickBlock, from);
        self.click(admin, InteractAction::RightClickBlock, to);
    }

    fn run(&self, player: EntityHandle, line: &str) -> Vec<String> {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let result = self.core.invoke(player, "flats", &args);
        self.plugin.reply_lines(&result)
    }

    fn breaks(&self, player: EntityHandle, block: BlockPos) -> bool {
        !self.send(EventKind::BlockBreak, Some(player), &BlockEvent { block }).cancelled
    }

    fn ticks(&self, n: usize) {
        for _ in 0..n {
            self.core.tick();
        }
    }
}

fn pos(x: i32, y: i32, z: i32) -> BlockPos {
    BlockPos::new("world", x, y, z)
}

/// An admin and a flat `a1` spanning 0..=9 on every axis.
async fn server_with_flat(settings: &str) -> (Server, EntityHandle) {
    let server = Server::start(settings).await;
    let admin = server.join("Admin", true);
    server.select(admin, pos(0, 0, 0), pos(9, 9, 9));
    assert_eq!(server.run(admin, "add a1"), vec!["[Flats] Flat a1 was created."]);
    (server, admin)
}

#[tokio::test]
async fn admins_create_flats_from_their_selection() {
    let (server, admin) = server_with_flat("").await;

    server.select(admin, pos(5, 5, 5), pos(12, 5, 5));
    assert_eq!(
        server.run(admin, "add a2"),
        vec![
            "[Flats] Your selection overlaps an existing flat.",
            "[Flats] Flat a1 at world:0,0,0;9,9,9",
        ]
    );

    server.select(admin, pos(20, 0, 0), pos(24, 4, 4));
    assert_eq!(server.run(admin, "add a1"), vec!["[Flats] Added an area to flat a1."]);

    let list = server.run(admin, "list");
    assert_eq!(
        list,
        vec![
            "[Flats] All flats:",
            "[Flats] Flat: a1",
            "[Flats] Owner: unoccupied",
            "[Flats] Areas:",
            "[Flats]  ├ world:0,0,0;9,9,9",
            "[Flats]  └ world:20,0,0;24,4,4",
        ]
    );

    assert_eq!(server.run(admin, "add"), vec!["[Flats] Usage: /flats add <name>"]);
    assert_eq!(server.run(admin, "remove nope"), vec!["[Flats] This flat does not exist."]);
    assert_eq!(server.run(admin, "remove a1"), vec!["[Flats] Flat a1 was deleted."]);
    assert_eq!(server.run(admin, "list"), vec!["[Flats] There are no flats yet."]);
}

#[tokio::test]
async fn selections_are_checked_before_adding() {
    let server = Server::start("max_flat_size = 100\n").await;
    let admin = server.join("Admin", true);

    assert_eq!(server.run(admin, "add a1"), vec!["[Flats] You have not selected an area yet."]);

    server.select(admin, pos(0, 0, 0), pos(9, 9, 9));
    assert_eq!(server.run(admin, "add a1"), vec!["[Flats] Your selection is too large."]);
}

#[tokio::test]
async fn players_claim_and_share_flats() {
    let (server, admin) = server_with_flat("").await;
    server.select(admin, pos(30, 0, 0), pos(35, 5, 5));
    server.run(admin, "add b1");

    let steve = server.join("Steve", false);
    let alex = server.join("Alex", false);
    let eve = server.join("Eve", false);

    assert_eq!(server.run(steve, "claim"), vec!["[Flats] You are not standing in a flat."]);

    server.move_to(steve, pos(1, 1, 1));
    assert_eq!(server.run(steve, "claim"), vec!["[Flats] This flat is yours now."]);
    assert_eq!(server.run(steve, "claim"), vec!["[Flats] This flat already belongs to you."]);

    server.move_to(steve, pos(31, 1, 1));
    assert_eq!(
        server.run(steve, "claim"),
        vec!["[Flats] You cannot own more than 1 flat(s)."]
    );

    server.move_to(eve, pos(2, 2, 2));
    assert_eq!(
        server.run(eve, "claim"),
        vec!["[Flats] This flat already belongs to Steve."]
    );
    assert_eq!(server.run(eve, "trust Eve"), vec!["[Flats] This is not your flat."]);

    server.move_to(steve, pos(1, 1, 1));
    assert_eq!(server.run(steve, "trust alex"), vec!["[Flats] Alex is now trusted in your flat."]);
    assert_eq!(
        server.run(steve, "trust Alex"),
        vec!["[Flats] Alex is already trusted in your flat."]
    );
    assert_eq!(
        server.run(steve, "trust Herobrine"),
        vec!["[Flats] The player Herobrine has never been on this server."]
    );

    assert_eq!(
        server.run(steve, "info"),
        vec![
            "[Flats] Flat: a1",
            "[Flats] Owner: Steve",
            "[Flats] Trusted players:",
            "[Flats]  └ Alex",
            "[Flats] Area: world:0,0,0;9,9,9",
        ]
    );

    assert!(server.breaks(steve, pos(3, 3, 3)));
    assert!(server.breaks(alex, pos(3, 3, 3)));
    assert!(server.breaks(admin, pos(3, 3, 3)));
    assert!(!server.breaks(eve, pos(3, 3, 3)));
    assert!(server.breaks(eve, pos(50, 3, 3)));

    assert_eq!(
        server.run(steve, "untrust Alex"),
        vec!["[Flats] Alex is no longer trusted in your flat."]
    );
    assert!(!server.breaks(alex, pos(3, 3, 3)));

    server.run(steve, "trust Alex");
    assert_eq!(server.run(steve, "unclaim"), vec!["[Flats] You gave up this flat."]);
    assert!(!server.breaks(alex, pos(3, 3, 3)));
    assert!(!server.breaks(steve, pos(3, 3, 3)));
}

#[tokio::test]
async fn non_player_actors_are_kept_out() {
    let (server, _) = server_with_flat("").await;
    let outcome = server.send(EventKind::EntityChangeBlock, None, &BlockEvent { block: pos(1, 1, 1) });
    assert!(outcome.cancelled);
}

#[tokio::test]
async fn help_and_gates_follow_permissions() {
    let (server, admin) = server_with_flat("").await;
    let steve = server.join("Steve", false);

    assert_eq!(
        server.run(steve, ""),
        vec![
            "[Flats] Available commands:",
            "/flats info - Show the flat you are standing in",
            "/flats claim - Claim the flat you are standing in",
            "/flats unclaim - Give up the flat you are standing in",
            "/flats trust <player> - Let a player build in your flat",
            "/flats untrust <player> - Revoke a player's access to your flat",
            "/flats show - Highlight the flats around you",
        ]
    );
    assert_eq!(server.run(admin, "whatever").len(), 11);
    assert_eq!(
        server.run(steve, "add x"),
        vec!["[Flats] You do not have permission to do that."]
    );
    assert_eq!(
        server.run(steve, "list"),
        vec!["[Flats] You do not have permission to do that."]
    );

    let mut completions = server.core.complete(steve, "flats", &["".to_string()]);
    completions.sort();
    assert_eq!(completions, vec!["claim", "info", "show", "trust", "unclaim", "untrust"]);
    assert_eq!(
        server.core.complete(admin, "flats", &["remove".to_string(), "a".to_string()]),
        vec!["a1"]
    );
}

#[tokio::test]
async fn advanced_permissions_need_explicit_nodes() {
    let server = Server::start("advanced_permissions = true\n").await;
    let nobody = server.join("Nobody", false);
    assert_eq!(
        server.run(nobody, ""),
        vec!["[Flats] You do not have permission to do that."]
    );

    let builder = EntityHandle::new_player();
    let joined = PlayerJoined {
        name: "Builder".to_string(),
        permissions: vec!["flats.list".to_string()],
        op: false,
        position: pos(0, 0, 0),
    };
    server.send(EventKind::PlayerJoin, Some(builder), &joined);
    assert_eq!(server.run(builder, "list"), vec!["[Flats] There are no flats yet."]);
    assert_eq!(
        server.run(builder, "claim"),
        vec!["[Flats] You do not have permission to do that."]
    );
}

#[tokio::test]
async fn show_highlights_outlines_in_batches_and_restores_them() {
    let (server, admin) = server_with_flat("").await;
    server.move_to(admin, pos(50, 0, 0));
    server.host.take();

    assert_eq!(
        server.run(admin, "show"),
        vec!["[Flats] Showing 1 flat for 10 seconds."]
    );
    server.ticks(6);

    let batches: Vec<usize> = server
        .host
        .calls()
        .iter()
        .filter_map(|call| match call {
            HostCall::BlockChanges(p, blocks, material) if *p == admin => {
                assert_eq!(material, "yellow_stained_glass");
                Some(blocks.len())
            }
            _ => None,
        })
        .collect();
    // A 10x10x10 cuboid has 1000 - 8^3 = 488 shell blocks.
    assert_eq!(batches, vec![100, 100, 100, 100, 88]);

    server.ticks(200);
    let restored = server.host.calls().into_iter().find_map(|call| match call {
        HostCall::RestoreBlocks(p, blocks) if p == admin => Some(blocks.len()),
        _ => None,
    });
    assert_eq!(restored, Some(488));
}

#[tokio::test]
async fn show_puts_players_on_a_delay() {
    let (server, _) = server_with_flat("").await;
    let steve = server.join("Steve", false);
    server.move_to(steve, pos(500, 64, 500));

    assert_eq!(server.run(steve, "show"), vec!["[Flats] There are no flats near you."]);
    assert_eq!(
        server.run(steve, "show"),
        vec!["[Flats] Please wait 10 more second(s) before using this command again."]
    );

    server.ticks(190);
    assert_eq!(
        server.run(steve, "show"),
        vec!["[Flats] Please wait 1 more second(s) before using this command again."]
    );

    server.ticks(10);
    assert_eq!(server.run(steve, "show"), vec!["[Flats] There are no flats near you."]);
}

#[tokio::test]
async fn auto_gamemode_switches_on_owned_flats() {
    let (server, _) = server_with_flat("enable_auto_gamemode = true\ninside_flat_gamemode = \"creative\"\n").await;
    let steve = server.join("Steve", false);

    server.move_to(steve, pos(1, 1, 1));
    server.run(steve, "claim");
    server.move_to(steve, pos(40, 1, 1));
    server.move_to(steve, pos(1, 1, 1));

    assert_eq!(
        server.host.game_modes_of(steve),
        vec![GameMode::Adventure, GameMode::Adventure, GameMode::Creative]
    );
}

#[tokio::test]
async fn flats_survive_a_restart() {
    let (server, _) = server_with_flat("").await;
    let steve = server.join("Steve", false);
    server.move_to(steve, pos(1, 1, 1));
    server.run(steve, "claim");

    let Server { core, plugin, dir, .. } = server;
    plugin.disable(&core).unwrap();
    assert!(!core.commands().is_registered("flats"));
    assert!(dir.path().join("flats.json").exists());

    let restarted = Server::start_in(dir, "").await;
    let admin = restarted.join("Admin", true);
    let list = restarted.run(admin, "list");
    assert_eq!(list[1], "[Flats] Flat: a1");
    assert_eq!(list[2], format!("[Flats] Owner: {}", steve.id));
}

#[tokio::test]
async fn disabling_keeps_flats_added_after_the_last_auto_save() {
    let (server, admin) = server_with_flat("auto_save_interval = 1\n").await;
    server.ticks(20);
    server.select(admin, pos(20, 0, 20), pos(29, 9, 29));
    assert_eq!(server.run(admin, "add b1"), vec!["[Flats] Flat b1 was created."]);

    let Server { core, plugin, dir, .. } = server;
    plugin.disable(&core).unwrap();
    // Give the auto-save that was in flight time to land.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let restarted = Server::start_in(dir, "").await;
    let admin = restarted.join("Admin", true);
    let list = restarted.run(admin, "list");
    assert!(list.contains(&"[Flats] Flat: a1".to_string()));
    assert!(list.contains(&"[Flats] Flat: b1".to_string()));
}
