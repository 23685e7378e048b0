//! Scripted play sessions.
//!
//! A session script is a JSON-lines file. Each line is one step performed by
//! a named player once `at` ticks have passed since the replay started:
//!
//! ```text
//! # blank lines and lines starting with '#' are skipped
//! {"at": 0,  "player": "Alex",  "do": "join", "op": true, "position": {"world": "world", "x": 0, "y": 64, "z": 0}}
//! {"at": 2,  "player": "Alex",  "do": "click", "click": "left_click_block", "wand": true, "block": {"world": "world", "x": 0, "y": 60, "z": 0}}
//! {"at": 3,  "player": "Alex",  "do": "click", "click": "right_click_block", "wand": true, "block": {"world": "world", "x": 9, "y": 70, "z": 9}}
//! {"at": 4,  "player": "Alex",  "do": "command", "line": "/flats add home"}
//! {"at": 20, "player": "Alex",  "do": "break", "block": {"world": "world", "x": 3, "y": 64, "z": 3}}
//! ```

use anyhow::{bail, Context, Result};
use flats_core::{
    BlockPos, CommandFeed, Core, DispatchOutcome, Envelope, EntityHandle, EventFeed, EventKind,
    InvocationReport, Tick,
};
use flats_plugin::commands::reply_lines;
use flats_plugin::events::{BlockEvent, InteractAction, PlayerInteract, PlayerJoined, PlayerMoved};
use flats_plugin::{FlatsContext, ItemStack};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    /// Ticks after the start of the replay.
    #[serde(default)]
    pub at: Tick,
    pub player: String,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum Action {
    Join {
        #[serde(default)]
        op: bool,
        #[serde(default)]
        permissions: Vec<String>,
        position: BlockPos,
    },
    Quit,
    Move {
        to: BlockPos,
    },
    Click {
        click: InteractAction,
        block: BlockPos,
        /// Whether the player holds the selection wand.
        #[serde(default)]
        wand: bool,
    },
    Break {
        block: BlockPos,
    },
    Place {
        block: BlockPos,
    },
    Command {
        line: String,
    },
}

/// A submitted step whose result arrives once the tick loop processed it.
#[derive(Debug)]
pub enum Pending {
    Command {
        player: EntityHandle,
        line: String,
        report: oneshot::Receiver<InvocationReport>,
    },
    Block {
        player: String,
        block: BlockPos,
        outcome: oneshot::Receiver<DispatchOutcome>,
    },
}

#[derive(Debug, Default)]
pub struct Session {
    steps: VecDeque<Step>,
    players: HashMap<String, EntityHandle>,
}

impl Session {
    pub async fn load(path: &Path) -> Result<Self> {
        let script = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading session script {}", path.display()))?;
        Self::parse(&script).with_context(|| format!("in session script {}", path.display()))
    }

    /// Parses a script. Steps are ordered by `at`, keeping file order for
    /// steps due on the same tick.
    pub fn parse(script: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (index, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step: Step =
                serde_json::from_str(line).with_context(|| format!("line {}", index + 1))?;
            steps.push(step);
        }
        steps.sort_by_key(|step| step.at);
        Ok(Self {
            steps: steps.into(),
            players: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_finished(&self) -> bool {
        self.steps.is_empty()
    }

    /// Handle the session uses for the named player, once they joined.
    pub fn player(&self, name: &str) -> Option<EntityHandle> {
        self.players.get(name).copied()
    }

    /// Submits every step due `elapsed` ticks into the replay.
    ///
    /// A step that cannot be submitted is logged and skipped.
    pub fn submit_due(&mut self, elapsed: Tick, events: &EventFeed, commands: &CommandFeed) -> Vec<Pending> {
        let mut pending = Vec::new();
        while self.steps.front().is_some_and(|step| step.at <= elapsed) {
            let Some(step) = self.steps.pop_front() else {
                break;
            };
            match self.submit(step, events, commands) {
                Ok(Some(p)) => pending.push(p),
                Ok(None) => {}
                Err(e) => warn!("⚠️ Skipping session step: {:#}", e),
            }
        }
        pending
    }

    fn submit(&mut self, step: Step, events: &EventFeed, commands: &CommandFeed) -> Result<Option<Pending>> {
        let Step { player: name, action, .. } = step;

        let player = match action {
            Action::Join { .. } => *self
                .players
                .entry(name.clone())
                .or_insert_with(EntityHandle::new_player),
            _ => match self.player(&name) {
                Some(player) => player,
                None => bail!("{} has not joined", name),
            },
        };

        match action {
            Action::Join {
                op,
                permissions,
                position,
            } => {
                info!("🎬 {} joins at {}", name, position);
                let joined = PlayerJoined {
                    name,
                    permissions,
                    op,
                    position,
                };
                events.submit_event(EventKind::PlayerJoin, [player], &joined)?;
                Ok(None)
            }
            Action::Quit => {
                info!("🎬 {} quits", name);
                events.submit_event(EventKind::PlayerQuit, [player], &json!({}))?;
                Ok(None)
            }
            Action::Move { to } => {
                events.submit_event(EventKind::PlayerMove, [player], &PlayerMoved { to })?;
                Ok(None)
            }
            Action::Click { click, block, wand } => {
                let interact = PlayerInteract {
                    action: click,
                    item: wand.then(ItemStack::selection_wand),
                    clicked_block: Some(block),
                    interaction_point: None,
                };
                events.submit_event(EventKind::PlayerInteract, [player], &interact)?;
                Ok(None)
            }
            Action::Break { block } => self.submit_block(EventKind::BlockBreak, name, player, block, events),
            Action::Place { block } => self.submit_block(EventKind::BlockPlace, name, player, block, events),
            Action::Command { line } => {
                info!("🎬 {} runs {}", name, line);
                let report = commands.submit_line(player, &line)?;
                Ok(Some(Pending::Command { player, line, report }))
            }
        }
    }

    fn submit_block(
        &self,
        kind: EventKind,
        name: String,
        player: EntityHandle,
        block: BlockPos,
        events: &EventFeed,
    ) -> Result<Option<Pending>> {
        let envelope = Envelope::from_event(kind, events.now(), &BlockEvent { block: block.clone() })?
            .with_source(player);
        let outcome = events.request(envelope)?;
        Ok(Some(Pending::Block {
            player: name,
            block,
            outcome,
        }))
    }

    /// Replays the script against a running tick loop until every step is
    /// submitted or `shutdown` turns `true`.
    pub async fn run(
        mut self,
        core: Arc<Core>,
        flats: Arc<FlatsContext>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let events = core.event_feed();
        let commands = core.command_feed();
        let start = core.now();
        let mut ticker = tokio::time::interval(interval);
        info!("🎬 Replaying {} session step(s)", self.len());

        while !self.is_finished() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🎬 Session interrupted with {} step(s) left", self.len());
                        return;
                    }
                }
            }

            let elapsed = core.now().saturating_sub(start);
            for pending in self.submit_due(elapsed, &events, &commands) {
                tokio::spawn(deliver(pending, flats.clone()));
            }
        }
        info!("🎬 Session finished");
    }
}

/// Waits for the result of a submitted step and reports it.
pub async fn deliver(pending: Pending, flats: Arc<FlatsContext>) {
    match pending {
        Pending::Command { player, line, report } => match report.await {
            Ok(report) => {
                debug!("{} finished as {:?}", line, report.state);
                for reply in reply_lines(&flats.i18n, &report.result) {
                    flats.host.send_message(player, &reply);
                }
            }
            Err(_) => warn!("⚠️ {} was dropped before it ran", line),
        },
        Pending::Block {
            player,
            block,
            outcome,
        } => match outcome.await {
            Ok(outcome) if outcome.cancelled => info!("🛡️ {} was stopped at {}", player, block),
            Ok(_) => debug!("{} changed the block at {}", player, block),
            Err(_) => warn!("⚠️ Block event of {} at {} was dropped", player, block),
        },
    }
}
