//! # Command Dispatcher
//!
//! Parses, validates and runs command invocations against the state store.
//!
//! ## Flow of one invocation
//!
//! 1. Resolve the command path through the subcommand tree
//!    (`flats claim` is the `claim` child of the `flats` root).
//! 2. Check the requester has an active record and passes the permission
//!    predicate.
//! 3. Parse the remaining arguments against the argument specs.
//! 4. Run the handler with a [`CommandContext`] holding a store transaction.
//! 5. On success commit the transaction, then submit deferred tasks.
//!
//! Steps 1-3 never touch the store, and a failing handler's staged writes
//! are discarded, so a rejected invocation leaves no trace.

use crate::error::{CommandError, CommandResult, ErrorClass};
use crate::event::Inbound;
use crate::scheduler::{panic_message, Task, TaskScheduler};
use crate::store::{StateStore, StoreView, Transaction};
use crate::types::{attrs, AttrValue, EntityHandle, EntityKind, Tick};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

// ============================================================================
// Argument specs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A single token.
    Word,
    /// A signed integer.
    Integer,
    /// The name of an online player, resolved to their handle.
    Player,
    /// Everything that is left, joined by single spaces.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    name: String,
    kind: ArgKind,
    optional: bool,
}

impl ArgSpec {
    fn new(name: &str, kind: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
        }
    }

    pub fn word(name: &str) -> Self {
        Self::new(name, ArgKind::Word)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ArgKind::Integer)
    }

    pub fn player(name: &str) -> Self {
        Self::new(name, ArgKind::Player)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ArgKind::Text)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    fn usage_fragment(&self) -> String {
        if self.optional {
            format!("[{}]", self.name)
        } else {
            format!("<{}>", self.name)
        }
    }
}

/// A parsed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Word(String),
    Integer(i64),
    Player(EntityHandle),
    Text(String),
}

/// Arguments of one invocation after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArgs {
    values: Vec<(String, ArgValue)>,
}

impl ParsedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn word(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Word(w)) => Some(w),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ArgValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn player(&self, name: &str) -> Option<EntityHandle> {
        match self.get(name) {
            Some(ArgValue::Player(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Whether the requester's record grants `node`.
///
/// Operators hold every node. Other players hold the nodes listed in their
/// `permissions` attribute.
pub fn has_permission(store: StoreView<'_>, requester: EntityHandle, node: &str) -> bool {
    store
        .read(requester, |record| {
            if record.get(attrs::OPERATOR).and_then(AttrValue::as_bool) == Some(true) {
                return true;
            }
            record
                .get(attrs::PERMISSIONS)
                .and_then(AttrValue::as_list)
                .is_some_and(|nodes| nodes.iter().any(|n| n.as_text() == Some(node)))
        })
        .unwrap_or(false)
}

type PermissionFn = dyn Fn(EntityHandle, &StateStore) -> bool + Send + Sync;

/// Permission predicate evaluated against the requester's record.
#[derive(Clone)]
pub struct Permission {
    label: String,
    check: Arc<PermissionFn>,
}

impl Permission {
    /// Requires a single permission node.
    pub fn node(node: &str) -> Self {
        let owned = node.to_string();
        Self {
            label: node.to_string(),
            check: Arc::new(move |requester: EntityHandle, store: &StateStore| {
                has_permission(store.view(), requester, &owned)
            }),
        }
    }

    /// A custom predicate. `label` names it in logs and descriptors.
    pub fn predicate<F>(label: &str, check: F) -> Self
    where
        F: Fn(EntityHandle, &StateStore) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.to_string(),
            check: Arc::new(check),
        }
    }

    pub fn allows(&self, requester: EntityHandle, store: &StateStore) -> bool {
        (self.check)(requester, store)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Permission").field(&self.label).finish()
    }
}

// ============================================================================
// Handlers, context & output
// ============================================================================

/// Messages a command sends back to its requester.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    messages: Vec<String>,
}

impl CommandOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn with(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Change to plugin state kept outside the store.
type CommitHook = Box<dyn FnOnce()>;

/// Everything a command handler can see and touch.
pub struct CommandContext<'a> {
    requester: EntityHandle,
    path: String,
    args: ParsedArgs,
    tick: Tick,
    txn: Transaction<'a>,
    scheduler: &'a TaskScheduler,
    deferred: Vec<Task>,
    on_commit: Vec<CommitHook>,
}

impl<'a> CommandContext<'a> {
    pub fn requester(&self) -> EntityHandle {
        self.requester
    }

    /// Resolved command path, e.g. `flats claim`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &ParsedArgs {
        &self.args
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// The committed store, read-only. Reads here do not see this command's
    /// own writes, and every write goes through [`CommandContext::set`],
    /// [`CommandContext::unset`] or [`CommandContext::txn`].
    pub fn store(&self) -> StoreView<'a> {
        self.txn.store()
    }

    pub fn scheduler(&self) -> &'a TaskScheduler {
        self.scheduler
    }

    pub fn txn(&mut self) -> &mut Transaction<'a> {
        &mut self.txn
    }

    /// Reads an attribute of the requester, including staged writes.
    pub fn get(&self, key: &str) -> CommandResult<Option<AttrValue>> {
        Ok(self.txn.get(self.requester, key)?)
    }

    /// Stages a write to the requester's record.
    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) -> CommandResult<()> {
        let requester = self.requester;
        Ok(self.txn.set(requester, key, value)?)
    }

    pub fn unset(&mut self, key: &str) -> CommandResult<()> {
        let requester = self.requester;
        Ok(self.txn.unset(requester, key)?)
    }

    /// Queues a task to be submitted once the transaction commits.
    pub fn defer(&mut self, task: Task) {
        self.deferred.push(task);
    }

    /// Runs `apply` right after the transaction commits, before deferred
    /// tasks are submitted. Nothing runs if the handler fails or the commit
    /// is rejected.
    pub fn on_commit(&mut self, apply: impl FnOnce() + 'static) {
        self.on_commit.push(Box::new(apply));
    }
}

pub trait CommandHandler: Send + Sync {
    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult<CommandOutput>;
}

impl<F> CommandHandler for F
where
    F: Fn(&mut CommandContext<'_>) -> CommandResult<CommandOutput> + Send + Sync,
{
    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult<CommandOutput> {
        self(ctx)
    }
}

/// Supplies completions for the arguments after the command path.
pub type Completer = Arc<dyn Fn(EntityHandle, &StateStore, &[String]) -> Vec<String> + Send + Sync>;

/// A registered command.
#[derive(Clone)]
pub struct CommandSpec {
    description: String,
    args: Vec<ArgSpec>,
    permission: Option<Permission>,
    handler: Arc<dyn CommandHandler>,
    completer: Option<Completer>,
}

impl CommandSpec {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut CommandContext<'_>) -> CommandResult<CommandOutput> + Send + Sync + 'static,
    {
        Self::with_handler(handler)
    }

    /// Builds a spec around any [`CommandHandler`] implementation.
    pub fn with_handler<H>(handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        Self {
            description: String::new(),
            args: Vec::new(),
            permission: None,
            handler: Arc::new(handler),
            completer: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn completer<F>(mut self, completer: F) -> Self
    where
        F: Fn(EntityHandle, &StateStore, &[String]) -> Vec<String> + Send + Sync + 'static,
    {
        self.completer = Some(Arc::new(completer));
        self
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    fn usage(&self, path: &str) -> String {
        let mut usage = format!("/{}", path);
        for arg in &self.args {
            usage.push(' ');
            usage.push_str(&arg.usage_fragment());
        }
        usage
    }

    fn permits(&self, requester: EntityHandle, store: &StateStore) -> bool {
        self.permission
            .as_ref()
            .map_or(true, |p| p.allows(requester, store))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("description", &self.description)
            .field("args", &self.args)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

/// What the host's command registry learns about a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub path: String,
    pub usage: String,
    pub description: String,
    pub permission: Option<String>,
}

#[derive(Default)]
struct CommandNode {
    spec: Option<CommandSpec>,
    children: BTreeMap<String, CommandNode>,
}

// ============================================================================
// Command queue
// ============================================================================

/// Terminal state of a queued invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Completed,
    Failed,
    /// The requester left before the command ran.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub state: InvocationState,
    pub result: CommandResult<CommandOutput>,
}

pub(crate) struct QueuedCommand {
    requester: EntityHandle,
    name: String,
    args: Vec<String>,
    reply: Option<oneshot::Sender<InvocationReport>>,
}

/// Thread-safe handle for queueing command invocations from the host.
#[derive(Clone)]
pub struct CommandFeed {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CommandFeed {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    /// Queues a raw command line such as `/flats trust Steve`.
    pub fn submit_line(
        &self,
        requester: EntityHandle,
        line: &str,
    ) -> CommandResult<oneshot::Receiver<InvocationReport>> {
        let mut tokens = line.trim().trim_start_matches('/').split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        let args = tokens.map(str::to_string).collect();
        self.submit(requester, name, args)
    }

    pub fn submit(
        &self,
        requester: EntityHandle,
        name: &str,
        args: Vec<String>,
    ) -> CommandResult<oneshot::Receiver<InvocationReport>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Inbound::Command(QueuedCommand {
                requester,
                name: name.to_string(),
                args,
                reply: Some(reply),
            }))
            .map_err(|_| CommandError::Internal("command queue is closed".to_string()))?;
        Ok(rx)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct CommandDispatcher {
    roots: RwLock<BTreeMap<String, CommandNode>>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a command at a whitespace-separated path.
    ///
    /// `register("flats claim", spec)` adds `claim` under the `flats` root,
    /// creating the root if needed. Registering an existing path replaces it.
    pub fn register(&self, path: &str, spec: CommandSpec) {
        let segments: Vec<String> = path.split_whitespace().map(str::to_lowercase).collect();
        let Some((root, rest)) = segments.split_first() else {
            warn!("Ignoring command registration with an empty path");
            return;
        };

        let mut roots = self.roots.write();
        let mut node = roots.entry(root.clone()).or_default();
        for segment in rest {
            node = node.children.entry(segment.clone()).or_default();
        }
        if node.spec.replace(spec).is_some() {
            warn!("⚠️ Command /{} was registered twice; keeping the newest", path);
        } else {
            info!("📝 Registered command /{}", path);
        }
    }

    /// Removes a root command and all of its subcommands.
    pub fn unregister(&self, name: &str) -> bool {
        self.roots.write().remove(&name.to_lowercase()).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.roots.read().contains_key(&name.to_lowercase())
    }

    /// Every registered command, for the host's command registry.
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        fn walk(path: &str, node: &CommandNode, out: &mut Vec<CommandDescriptor>) {
            if let Some(spec) = &node.spec {
                out.push(CommandDescriptor {
                    path: path.to_string(),
                    usage: spec.usage(path),
                    description: spec.description.clone(),
                    permission: spec.permission.as_ref().map(|p| p.label().to_string()),
                });
            }
            for (name, child) in &node.children {
                walk(&format!("{} {}", path, name), child, out);
            }
        }

        let roots = self.roots.read();
        let mut out = Vec::new();
        for (name, node) in roots.iter() {
            walk(name, node, &mut out);
        }
        out
    }

    /// Resolves the deepest registered path matching `name args...`.
    ///
    /// Returns the path, the spec (if that node has one), the help listing
    /// for the node, and how many arguments the path consumed.
    fn resolve(
        &self,
        requester: EntityHandle,
        store: &StateStore,
        name: &str,
        args: &[String],
    ) -> CommandResult<(String, Option<CommandSpec>, Vec<String>, usize)> {
        let roots = self.roots.read();
        let mut node = roots
            .get(&name.to_lowercase())
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        let mut path = name.to_lowercase();
        let mut consumed = 0;

        while let Some(child) = args
            .get(consumed)
            .and_then(|arg| node.children.get(&arg.to_lowercase()))
        {
            path.push(' ');
            path.push_str(&args[consumed].to_lowercase());
            node = child;
            consumed += 1;
        }

        let help = node
            .children
            .iter()
            .filter_map(|(child_name, child)| {
                let spec = child.spec.as_ref()?;
                if !spec.permits(requester, store) {
                    return None;
                }
                let child_path = format!("{} {}", path, child_name);
                let usage = spec.usage(&child_path);
                Some(if spec.description.is_empty() {
                    usage
                } else {
                    format!("{} - {}", usage, spec.description)
                })
            })
            .collect();

        Ok((path, node.spec.clone(), help, consumed))
    }

    /// Runs one invocation synchronously on the calling (tick) thread.
    pub fn invoke(
        &self,
        requester: EntityHandle,
        name: &str,
        args: &[String],
        store: &StateStore,
        scheduler: &TaskScheduler,
        tick: Tick,
    ) -> CommandResult<CommandOutput> {
        let result = self.try_invoke(requester, name, args, store, scheduler, tick);
        if let Err(e) = &result {
            match e.class() {
                ErrorClass::Validation | ErrorClass::NotFound => {
                    debug!("/{} {} by {} rejected: {}", name, args.join(" "), requester, e)
                }
                ErrorClass::TransientTask => {
                    warn!("⚠️ /{} by {} failed: {}", name, requester, e)
                }
                ErrorClass::ConsistencyViolation => {
                    error!("❌ /{} by {} failed: {}", name, requester, e)
                }
            }
        }
        result
    }

    fn try_invoke(
        &self,
        requester: EntityHandle,
        name: &str,
        args: &[String],
        store: &StateStore,
        scheduler: &TaskScheduler,
        tick: Tick,
    ) -> CommandResult<CommandOutput> {
        if !store.contains(requester) {
            return Err(CommandError::Store(crate::error::StoreError::NotFound(requester)));
        }

        let (path, spec, help, consumed) = self.resolve(requester, store, name, args)?;
        let Some(spec) = spec else {
            return Err(CommandError::Help(help));
        };
        if !spec.permits(requester, store) {
            return Err(CommandError::PermissionDenied { command: path });
        }
        let parsed = parse_args(&spec, &path, &args[consumed..], store)?;

        let mut ctx = CommandContext {
            requester,
            path,
            args: parsed,
            tick,
            txn: store.transaction(),
            scheduler,
            deferred: Vec::new(),
            on_commit: Vec::new(),
        };

        let handler = spec.handler.clone();
        let output = catch_unwind(AssertUnwindSafe(|| handler.execute(&mut ctx))).unwrap_or_else(
            |panic| {
                Err(CommandError::Internal(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )))
            },
        )?;

        let CommandContext {
            txn,
            deferred,
            on_commit,
            path,
            ..
        } = ctx;
        txn.commit()?;
        for apply in on_commit {
            apply();
        }
        for task in deferred {
            let task_name = task.name().to_string();
            if let Err(e) = scheduler.submit(task) {
                warn!("⚠️ /{} could not schedule '{}': {}", path, task_name, e);
            }
        }
        debug!("/{} by {} completed", path, requester);
        Ok(output)
    }

    /// Completions for a partially typed command.
    pub fn complete(
        &self,
        requester: EntityHandle,
        name: &str,
        args: &[String],
        store: &StateStore,
    ) -> Vec<String> {
        let roots = self.roots.read();
        let Some(mut node) = roots.get(&name.to_lowercase()) else {
            return Vec::new();
        };
        let (partial, complete_args) = match args.split_last() {
            Some((last, rest)) => (last.to_lowercase(), rest),
            None => (String::new(), args),
        };

        let mut consumed = 0;
        while let Some(child) = complete_args
            .get(consumed)
            .and_then(|arg| node.children.get(&arg.to_lowercase()))
        {
            node = child;
            consumed += 1;
        }

        let mut suggestions = Vec::new();
        if consumed == complete_args.len() {
            suggestions.extend(
                node.children
                    .iter()
                    .filter(|(child_name, _)| child_name.starts_with(&partial))
                    .filter(|(_, child)| {
                        child
                            .spec
                            .as_ref()
                            .is_some_and(|spec| spec.permits(requester, store))
                    })
                    .map(|(child_name, _)| child_name.clone()),
            );
        }

        if let Some(spec) = &node.spec {
            if !spec.permits(requester, store) {
                return suggestions;
            }
            let spec_args = &args[consumed.min(args.len())..];
            if let Some(completer) = &spec.completer {
                suggestions.extend(completer(requester, store, spec_args));
            } else if let Some(arg) = spec_args.len().checked_sub(1).and_then(|i| spec.args.get(i)) {
                if arg.kind == ArgKind::Player {
                    suggestions.extend(online_player_names(store, &partial));
                }
            }
        }
        suggestions
    }

    /// Runs one invocation taken off the inbound queue. A requester who left
    /// before it ran gets a `Cancelled` report.
    pub(crate) fn run_queued(
        &self,
        command: QueuedCommand,
        store: &StateStore,
        scheduler: &TaskScheduler,
        tick: Tick,
    ) {
        let report = if store.contains(command.requester) {
            let result = self.invoke(
                command.requester,
                &command.name,
                &command.args,
                store,
                scheduler,
                tick,
            );
            InvocationReport {
                state: if result.is_ok() {
                    InvocationState::Completed
                } else {
                    InvocationState::Failed
                },
                result,
            }
        } else {
            debug!("Dropping /{} from departed {}", command.name, command.requester);
            InvocationReport {
                state: InvocationState::Cancelled,
                result: Err(CommandError::Cancelled(format!(
                    "{} is no longer online",
                    command.requester
                ))),
            }
        };
        if let Some(reply) = command.reply {
            let _ = reply.send(report);
        }
    }
}

fn parse_args(
    spec: &CommandSpec,
    path: &str,
    raw: &[String],
    store: &StateStore,
) -> CommandResult<ParsedArgs> {
    let usage = || CommandError::Usage {
        usage: spec.usage(path),
    };
    let mut parsed = ParsedArgs::default();
    let mut next = 0;

    for arg in &spec.args {
        if arg.kind == ArgKind::Text {
            if next < raw.len() {
                parsed
                    .values
                    .push((arg.name.clone(), ArgValue::Text(raw[next..].join(" "))));
                next = raw.len();
            } else if !arg.optional {
                return Err(usage());
            }
            continue;
        }

        let Some(token) = raw.get(next) else {
            if arg.optional {
                continue;
            }
            return Err(usage());
        };
        next += 1;

        let value = match arg.kind {
            ArgKind::Word => ArgValue::Word(token.clone()),
            ArgKind::Integer => {
                let n = token.parse::<i64>().map_err(|_| CommandError::InvalidArgument {
                    name: arg.name.clone(),
                    reason: format!("'{}' is not a whole number", token),
                })?;
                ArgValue::Integer(n)
            }
            ArgKind::Player => {
                let handle = store
                    .find_player_by_name(token)
                    .ok_or_else(|| CommandError::PlayerNotFound(token.clone()))?;
                ArgValue::Player(handle)
            }
            ArgKind::Text => ArgValue::Text(token.clone()),
        };
        parsed.values.push((arg.name.clone(), value));
    }

    if next < raw.len() {
        return Err(usage());
    }
    Ok(parsed)
}

/// Names of online players starting with `prefix` (ASCII case-insensitive).
pub fn online_player_names(store: &StateStore, prefix: &str) -> Vec<String> {
    let prefix = prefix.to_lowercase();
    let mut names: Vec<String> = store
        .handles_of(EntityKind::Player)
        .into_iter()
        .filter_map(|h| store.get(h, attrs::NAME).ok().flatten())
        .filter_map(|v| v.as_text().map(str::to_string))
        .filter(|n| n.to_lowercase().starts_with(&prefix))
        .collect();
    names.sort();
    names
}
