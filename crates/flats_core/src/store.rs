//! # State Store
//!
//! Authoritative per-entity plugin state. Every active player and world owns
//! exactly one [`StateRecord`], a typed key/value map. The store is pure data
//! plus invariant enforcement; it performs no I/O.
//!
//! ## Atomicity
//!
//! Records live behind a single [`RwLock`]. Every mutation (single set,
//! multi-attribute [`StateStore::update`] or a committed [`Transaction`]) is
//! validated completely before the write lock applies it, so readers never
//! observe a partially-applied change.
//!
//! ## Cascading cleanup
//!
//! Components that keep per-entity bookkeeping register a [`RemovalHook`].
//! [`StateStore::remove`] runs all hooks while the record still exists and
//! only then releases it. The task scheduler uses this to cancel tasks owned
//! by a departing entity. Hooks run without any store lock held, so they may
//! read and write other records.
//!
//! ## Read-only access
//!
//! [`StoreView`] is a copyable handle that can only read. Command handlers get
//! one instead of the store so their writes have to go through the
//! transaction.

use crate::error::{StoreError, StoreResult};
use crate::types::{attrs, AttrValue, EntityHandle, EntityKind};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Attribute map of a single record.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Plugin-defined attribute validator. Returns the rejection reason on failure.
pub type Validator = Arc<dyn Fn(&AttrValue) -> Result<(), String> + Send + Sync>;

/// Cleanup hook invoked for every removed record, before it is released.
pub trait RemovalHook: Send + Sync {
    fn on_remove(&self, handle: EntityHandle);
}

/// The plugin state of one active entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    handle: EntityHandle,
    attributes: Attributes,
}

impl StateRecord {
    fn new(handle: EntityHandle, attributes: Attributes) -> Self {
        Self { handle, attributes }
    }

    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    pub fn kind(&self) -> EntityKind {
        self.handle.kind
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[derive(Clone)]
enum KeyPattern {
    Exact(String),
    Prefix(String),
}

impl KeyPattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => KeyPattern::Prefix(prefix.to_string()),
            None => KeyPattern::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Writes staged by a [`Transaction`], ready to be committed.
///
/// `None` values are staged removals.
#[derive(Debug, Default, Clone)]
pub struct PendingWrites {
    writes: BTreeMap<(EntityHandle, String), Option<AttrValue>>,
}

impl PendingWrites {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

/// Read-only access to a [`StateStore`].
#[derive(Clone, Copy)]
pub struct StoreView<'a> {
    store: &'a StateStore,
}

impl<'a> StoreView<'a> {
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.store.contains(handle)
    }

    pub fn get(&self, handle: EntityHandle, key: &str) -> StoreResult<Option<AttrValue>> {
        self.store.get(handle, key)
    }

    pub fn get_or(&self, handle: EntityHandle, key: &str, default: AttrValue) -> StoreResult<AttrValue> {
        self.store.get_or(handle, key, default)
    }

    pub fn read<R>(&self, handle: EntityHandle, f: impl FnOnce(&StateRecord) -> R) -> StoreResult<R> {
        self.store.read(handle, f)
    }

    pub fn handles_of(&self, kind: EntityKind) -> Vec<EntityHandle> {
        self.store.handles_of(kind)
    }

    pub fn find_player_by_name(&self, name: &str) -> Option<EntityHandle> {
        self.store.find_player_by_name(name)
    }
}

impl<'a> From<&'a StateStore> for StoreView<'a> {
    fn from(store: &'a StateStore) -> Self {
        store.view()
    }
}

impl fmt::Debug for StoreView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreView")
            .field("records", &self.store.len())
            .finish()
    }
}

/// The per-entity state store.
pub struct StateStore {
    records: RwLock<HashMap<EntityHandle, StateRecord>>,
    validators: RwLock<Vec<(KeyPattern, Validator)>>,
    hooks: RwLock<Vec<Arc<dyn RemovalHook>>>,
    /// Records whose removal hooks are running.
    removing: Mutex<HashSet<EntityHandle>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            validators: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            removing: Mutex::new(HashSet::new()),
        }
    }

    /// A read-only handle on this store.
    pub fn view(&self) -> StoreView<'_> {
        StoreView { store: self }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a validator for an exact key, or for every key starting with
    /// a prefix when the pattern ends in `*` (e.g. `"cooldown.*"`).
    pub fn register_validator<F>(&self, pattern: &str, validator: F)
    where
        F: Fn(&AttrValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .write()
            .push((KeyPattern::parse(pattern), Arc::new(validator)));
        debug!("Registered attribute validator for '{}'", pattern);
    }

    /// Adds a hook that runs for every removed record.
    pub fn add_removal_hook(&self, hook: Arc<dyn RemovalHook>) {
        self.hooks.write().push(hook);
    }

    fn validate(&self, handle: EntityHandle, key: &str, value: &AttrValue) -> StoreResult<()> {
        let validators = self.validators.read();
        for (pattern, validator) in validators.iter() {
            if pattern.matches(key) {
                validator(value).map_err(|reason| StoreError::InvalidAttribute {
                    handle,
                    key: key.to_string(),
                    reason,
                })?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates an empty record. This is the entity-join path.
    pub fn create(&self, handle: EntityHandle) -> StoreResult<()> {
        self.create_with(handle, Attributes::new())
    }

    /// Creates a record with initial attributes, validated as a whole.
    ///
    /// Creating a record that already exists is a consistency violation and
    /// leaves the existing record untouched.
    pub fn create_with<I, K>(&self, handle: EntityHandle, initial: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, AttrValue)>,
        K: Into<String>,
    {
        let attributes: Attributes = initial.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (key, value) in &attributes {
            self.validate(handle, key, value)?;
        }

        let mut records = self.records.write();
        if records.contains_key(&handle) {
            error!("Refusing to create duplicate record for {}", handle);
            return Err(StoreError::DuplicateRecord(handle));
        }
        records.insert(handle, StateRecord::new(handle, attributes));
        debug!("Created record for {}", handle);
        Ok(())
    }

    /// Removes a record after running every removal hook for it.
    ///
    /// Only one caller wins the removal; a concurrent or re-entrant remove of
    /// the same record gets `NotFound` and runs no hooks.
    pub fn remove(&self, handle: EntityHandle) -> StoreResult<()> {
        {
            let records = self.records.read();
            if !records.contains_key(&handle) || !self.removing.lock().insert(handle) {
                return Err(StoreError::NotFound(handle));
            }
        }

        let hooks: Vec<Arc<dyn RemovalHook>> = self.hooks.read().clone();
        for hook in hooks {
            hook.on_remove(handle);
        }

        self.records.write().remove(&handle);
        self.removing.lock().remove(&handle);
        debug!("Removed record for {}", handle);
        Ok(())
    }

    /// Removes every record, running the removal hooks for each.
    pub fn clear(&self) {
        for handle in self.handles() {
            // A hook may already have removed a related record.
            let _ = self.remove(handle);
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.records.read().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn handles(&self) -> Vec<EntityHandle> {
        self.records.read().keys().copied().collect()
    }

    pub fn handles_of(&self, kind: EntityKind) -> Vec<EntityHandle> {
        self.records
            .read()
            .keys()
            .filter(|h| h.kind == kind)
            .copied()
            .collect()
    }

    /// Reads an attribute. `Ok(None)` means the record exists but the key is unset.
    pub fn get(&self, handle: EntityHandle, key: &str) -> StoreResult<Option<AttrValue>> {
        let records = self.records.read();
        let record = records.get(&handle).ok_or(StoreError::NotFound(handle))?;
        Ok(record.get(key).cloned())
    }

    /// Reads an attribute, falling back to `default` when the key is unset.
    pub fn get_or(
        &self,
        handle: EntityHandle,
        key: &str,
        default: AttrValue,
    ) -> StoreResult<AttrValue> {
        Ok(self.get(handle, key)?.unwrap_or(default))
    }

    /// Runs `f` against a consistent view of one record.
    pub fn read<R>(&self, handle: EntityHandle, f: impl FnOnce(&StateRecord) -> R) -> StoreResult<R> {
        let records = self.records.read();
        let record = records.get(&handle).ok_or(StoreError::NotFound(handle))?;
        Ok(f(record))
    }

    /// A copy of the whole record.
    pub fn snapshot(&self, handle: EntityHandle) -> StoreResult<StateRecord> {
        self.read(handle, Clone::clone)
    }

    /// Handles of every record matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&StateRecord) -> bool) -> Vec<EntityHandle> {
        self.records
            .read()
            .values()
            .filter(|r| predicate(r))
            .map(StateRecord::handle)
            .collect()
    }

    /// Resolves an active player by name, ignoring ASCII case.
    pub fn find_player_by_name(&self, name: &str) -> Option<EntityHandle> {
        self.records
            .read()
            .values()
            .filter(|r| r.kind() == EntityKind::Player)
            .find(|r| {
                r.get(attrs::NAME)
                    .and_then(AttrValue::as_text)
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .map(StateRecord::handle)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn set(&self, handle: EntityHandle, key: &str, value: impl Into<AttrValue>) -> StoreResult<()> {
        let value = value.into();
        self.validate(handle, key, &value)?;

        let mut records = self.records.write();
        let record = records.get_mut(&handle).ok_or(StoreError::NotFound(handle))?;
        trace!("{} set {} = {:?}", handle, key, value);
        record.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Removes a single attribute, returning its previous value.
    pub fn unset(&self, handle: EntityHandle, key: &str) -> StoreResult<Option<AttrValue>> {
        let mut records = self.records.write();
        let record = records.get_mut(&handle).ok_or(StoreError::NotFound(handle))?;
        Ok(record.attributes.remove(key))
    }

    /// Applies a multi-attribute update atomically.
    ///
    /// `f` works on a copy of the attributes with no lock held. Every changed
    /// value is validated and the copy replaces the record only if all of them
    /// pass and nobody else changed the record in the meantime.
    pub fn update<R>(&self, handle: EntityHandle, f: impl FnOnce(&mut Attributes) -> R) -> StoreResult<R> {
        let original = self.read(handle, |record| record.attributes.clone())?;
        let mut draft = original.clone();
        let result = f(&mut draft);

        let mut records = self.records.write();
        let record = records.get_mut(&handle).ok_or(StoreError::NotFound(handle))?;
        if record.attributes != original {
            return Err(StoreError::Conflict(handle));
        }

        for (key, value) in &draft {
            if record.attributes.get(key) != Some(value) {
                self.validate(handle, key, value)?;
            }
        }
        record.attributes = draft;
        Ok(result)
    }

    /// Starts a transaction that stages writes against this store.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            pending: PendingWrites::default(),
        }
    }

    /// Applies staged writes atomically across all handles they touch.
    ///
    /// Fails without applying anything if any touched record is gone or any
    /// value is rejected by a validator.
    pub fn commit(&self, pending: PendingWrites) -> StoreResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let mut records = self.records.write();
        for ((handle, key), value) in &pending.writes {
            if !records.contains_key(handle) {
                return Err(StoreError::NotFound(*handle));
            }
            if let Some(value) = value {
                self.validate(*handle, key, value)?;
            }
        }

        for ((handle, key), value) in pending.writes {
            if let Some(record) = records.get_mut(&handle) {
                match value {
                    Some(value) => {
                        record.attributes.insert(key, value);
                    }
                    None => {
                        record.attributes.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Transaction-scoped view of the store.
///
/// Writes are staged and visible to this transaction's own reads; nobody else
/// sees them until [`StateStore::commit`] applies all of them together.
/// Dropping a transaction discards its writes.
pub struct Transaction<'a> {
    store: &'a StateStore,
    pending: PendingWrites,
}

impl<'a> Transaction<'a> {
    /// The committed store, read-only. Reads here do not see staged writes.
    pub fn store(&self) -> StoreView<'a> {
        self.store.view()
    }

    pub fn get(&self, handle: EntityHandle, key: &str) -> StoreResult<Option<AttrValue>> {
        if let Some(staged) = self.pending.writes.get(&(handle, key.to_string())) {
            if !self.store.contains(handle) {
                return Err(StoreError::NotFound(handle));
            }
            return Ok(staged.clone());
        }
        self.store.get(handle, key)
    }

    /// Stages a write. The value is validated immediately.
    pub fn set(&mut self, handle: EntityHandle, key: &str, value: impl Into<AttrValue>) -> StoreResult<()> {
        if !self.store.contains(handle) {
            return Err(StoreError::NotFound(handle));
        }
        let value = value.into();
        self.store.validate(handle, key, &value)?;
        self.pending.writes.insert((handle, key.to_string()), Some(value));
        Ok(())
    }

    /// Stages the removal of an attribute.
    pub fn unset(&mut self, handle: EntityHandle, key: &str) -> StoreResult<()> {
        if !self.store.contains(handle) {
            return Err(StoreError::NotFound(handle));
        }
        self.pending.writes.insert((handle, key.to_string()), None);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn into_pending(self) -> PendingWrites {
        self.pending
    }

    /// Commits the staged writes to the store.
    pub fn commit(self) -> StoreResult<()> {
        let store = self.store;
        store.commit(self.pending)
    }
}
