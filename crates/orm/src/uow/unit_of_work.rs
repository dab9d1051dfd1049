//! Unit of work
//!
//! A scoped, single-caller context that tracks loaded, added, and deleted
//! instances and reconciles them against storage in one atomic commit.
//! Dirty state is detected by comparing current values against the snapshot
//! captured at load time; there is no per-write interception.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use super::batch::{stable_topo_sort, WriteKind, WriteOp};
use super::instance::{EntityInstance, TrackedState};
use crate::backend::DatabasePool;
use crate::error::{OrmError, OrmResult};
use crate::schema::ModelRegistry;
use crate::value::{DatabaseValue, KeyTuple, KeyValue};

/// Handle to an instance tracked by a unit of work.
///
/// Handles are only meaningful against the unit of work that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoredState {
    Unchanged,
    Added,
    Deleted,
}

#[derive(Debug)]
struct TrackedEntry {
    instance: EntityInstance,
    /// Original values captured at load; `None` while the instance is Added
    snapshot: Option<BTreeMap<String, DatabaseValue>>,
    stored: StoredState,
    key: KeyTuple,
    table: String,
}

impl TrackedEntry {
    fn is_dirty(&self) -> bool {
        match &self.snapshot {
            Some(snapshot) => snapshot != self.instance.values(),
            None => false,
        }
    }
}

/// Counts of statements a commit emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    /// Total statements executed
    pub fn statements(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Change tracker and write coordinator for one logical caller.
///
/// Concurrent callers each build their own unit of work; the tracked-instance
/// map is deliberately unsynchronized. The pool is only borrowed for the
/// duration of a load or commit.
pub struct UnitOfWork {
    registry: Arc<ModelRegistry>,
    entries: Vec<Option<TrackedEntry>>,
    identity: HashMap<(String, KeyTuple), InstanceHandle>,
}

impl UnitOfWork {
    /// Create a unit of work over a sealed registry
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            identity: HashMap::new(),
        }
    }

    /// Load one row by primary key and track it as `Unchanged`.
    ///
    /// If the identity is already tracked, the existing handle is returned
    /// without touching storage (one instance per identity).
    pub async fn load(
        &mut self,
        pool: &dyn DatabasePool,
        entity: &str,
        key: &[KeyValue],
    ) -> OrmResult<Option<InstanceHandle>> {
        let descriptor = self.registry.descriptor(entity)?.clone();
        if key.len() != descriptor.key_columns().len() {
            return Err(OrmError::tracking(
                entity,
                format!(
                    "key has {} value(s) but '{}' declares {} key column(s)",
                    key.len(),
                    entity,
                    descriptor.key_columns().len()
                ),
            ));
        }

        let ident = (descriptor.table().to_string(), key.to_vec());
        if let Some(&handle) = self.identity.get(&ident) {
            debug!("identity already tracked for '{}'; returning existing instance", entity);
            return Ok(Some(handle));
        }

        let columns: Vec<&str> = descriptor.columns().iter().map(|c| c.name.as_str()).collect();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE ",
            columns.join(", "),
            descriptor.table()
        );
        let mut params = Vec::with_capacity(key.len());
        for (i, (column, value)) in descriptor.key_columns().iter().zip(key).enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            sql.push_str(&format!("{} = ${}", column, i + 1));
            params.push(DatabaseValue::from(value.clone()));
        }

        let Some(row) = pool.fetch_optional(&sql, &params).await? else {
            return Ok(None);
        };

        let mut values = BTreeMap::new();
        for column in descriptor.columns() {
            values.insert(column.name.clone(), row.get_by_name(&column.name)?);
        }

        let entry = TrackedEntry {
            snapshot: Some(values.clone()),
            instance: EntityInstance::from_values(entity, values),
            stored: StoredState::Unchanged,
            key: key.to_vec(),
            table: descriptor.table().to_string(),
        };
        Ok(Some(self.track(entry, ident)))
    }

    /// Track a fresh instance as `Added`
    pub fn add(&mut self, instance: EntityInstance) -> OrmResult<InstanceHandle> {
        let descriptor = self.registry.descriptor(instance.entity())?.clone();
        for column in instance.values().keys() {
            if descriptor.column(column).is_none() {
                return Err(OrmError::tracking(
                    instance.entity(),
                    format!("unknown column '{}'", column),
                ));
            }
        }
        let key = descriptor.identity_of(instance.values())?;
        let ident = (descriptor.table().to_string(), key.clone());
        if self.identity.contains_key(&ident) {
            return Err(OrmError::tracking(
                instance.entity(),
                format!("identity {:?} is already tracked", key),
            ));
        }

        let entry = TrackedEntry {
            instance,
            snapshot: None,
            stored: StoredState::Added,
            key,
            table: descriptor.table().to_string(),
        };
        Ok(self.track(entry, ident))
    }

    /// Mark a tracked instance for deletion.
    ///
    /// Deleting an `Added` instance removes it outright; it never reaches
    /// storage and never becomes `Deleted`.
    pub fn delete(&mut self, handle: InstanceHandle) -> OrmResult<()> {
        let entry = self.entry_mut(handle)?;
        match entry.stored {
            StoredState::Added => {
                let ident = (entry.table.clone(), entry.key.clone());
                self.entries[handle.0] = None;
                self.identity.remove(&ident);
            }
            StoredState::Unchanged => entry.stored = StoredState::Deleted,
            StoredState::Deleted => {}
        }
        Ok(())
    }

    /// Stop tracking an instance and hand its current values back.
    ///
    /// The returned copy is the caller's; the identity can be loaded again
    /// afterwards.
    pub fn detach(&mut self, handle: InstanceHandle) -> OrmResult<EntityInstance> {
        let entry = self.entry_mut(handle)?;
        let ident = (entry.table.clone(), entry.key.clone());
        let entry = self.entries[handle.0].take().expect("entry checked above");
        self.identity.remove(&ident);
        Ok(entry.instance)
    }

    /// Current state of a handle; detached or unknown handles report `Detached`
    pub fn state(&self, handle: InstanceHandle) -> TrackedState {
        match self.entries.get(handle.0).and_then(|slot| slot.as_ref()) {
            None => TrackedState::Detached,
            Some(entry) => match entry.stored {
                StoredState::Added => TrackedState::Added,
                StoredState::Deleted => TrackedState::Deleted,
                StoredState::Unchanged => {
                    if entry.is_dirty() {
                        TrackedState::Modified
                    } else {
                        TrackedState::Unchanged
                    }
                }
            },
        }
    }

    /// Read a field of a tracked instance
    pub fn value(&self, handle: InstanceHandle, column: &str) -> OrmResult<DatabaseValue> {
        let entry = self.entry(handle)?;
        entry
            .instance
            .value(column)
            .cloned()
            .ok_or_else(|| {
                OrmError::tracking(
                    entry.instance.entity(),
                    format!("unknown column '{}'", column),
                )
            })
    }

    /// Write a field of a tracked instance.
    ///
    /// Key columns are immutable once tracked; writing every field back to
    /// its original value returns the instance to `Unchanged`.
    pub fn set(
        &mut self,
        handle: InstanceHandle,
        column: &str,
        value: impl Into<DatabaseValue>,
    ) -> OrmResult<()> {
        let registry = Arc::clone(&self.registry);
        let entry = self.entry_mut(handle)?;
        let descriptor = registry.descriptor(entry.instance.entity())?;
        if descriptor.column(column).is_none() {
            return Err(OrmError::tracking(
                entry.instance.entity(),
                format!("unknown column '{}'", column),
            ));
        }
        if descriptor.key_columns().iter().any(|k| k == column) {
            return Err(OrmError::tracking(
                entry.instance.entity(),
                format!("key column '{}' is immutable once tracked", column),
            ));
        }
        if entry.stored == StoredState::Deleted {
            return Err(OrmError::tracking(
                entry.instance.entity(),
                "instance is marked for deletion",
            ));
        }
        entry.instance.set(column, value);
        Ok(())
    }

    /// Number of live tracked instances
    pub fn tracked_count(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Compute the write batch and execute it in one transaction.
    ///
    /// Inserts run parents-before-children along foreign keys, deletes in
    /// reverse; update and delete statements check every original column
    /// value and report `ConcurrencyConflict` when no row matches. On any
    /// failure the transaction rolls back and tracked state is left exactly
    /// as before the call.
    pub async fn commit(&mut self, pool: &dyn DatabasePool) -> OrmResult<CommitSummary> {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (idx, slot) in self.entries.iter().enumerate() {
            let Some(entry) = slot else { continue };
            match entry.stored {
                StoredState::Added => inserts.push(idx),
                StoredState::Deleted => deletes.push(idx),
                StoredState::Unchanged => {
                    if entry.is_dirty() {
                        updates.push(idx);
                    }
                }
            }
        }

        if inserts.is_empty() && updates.is_empty() && deletes.is_empty() {
            debug!("commit is a no-op; zero statements");
            return Ok(CommitSummary::default());
        }

        let insert_order = self.order_by_dependencies(&inserts)?;
        let delete_order = {
            let mut order = self.order_by_dependencies(&deletes)?;
            order.reverse();
            order
        };

        let mut ops = Vec::with_capacity(inserts.len() + updates.len() + deletes.len());
        for &idx in &insert_order {
            ops.push(self.insert_op(idx));
        }
        for &idx in &updates {
            ops.push(self.update_op(idx));
        }
        for &idx in &delete_order {
            ops.push(self.delete_op(idx));
        }

        debug!(
            "committing unit of work: {} insert(s), {} update(s), {} delete(s)",
            inserts.len(),
            updates.len(),
            deletes.len()
        );

        let mut conn = pool.acquire().await?;
        let mut tx = conn.begin().await?;
        let mut failure: Option<OrmError> = None;
        for op in &ops {
            match tx.execute(&op.sql, &op.params).await {
                Ok(affected) => {
                    if affected == 0 && op.kind != WriteKind::Insert {
                        failure = Some(OrmError::ConcurrencyConflict {
                            table: op.table.clone(),
                            key: op.key.clone(),
                        });
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            tx.rollback().await.ok(); // best-effort; tracked state stays as-is
            warn!("commit rolled back: {}", error);
            return Err(error);
        }
        tx.commit().await?;

        // States advance only after the backend committed.
        for &idx in inserts.iter().chain(&updates) {
            let entry = self.entries[idx].as_mut().expect("live entry");
            entry.snapshot = Some(entry.instance.values().clone());
            entry.stored = StoredState::Unchanged;
        }
        for &idx in &deletes {
            let entry = self.entries[idx].take().expect("live entry");
            self.identity.remove(&(entry.table, entry.key));
        }

        Ok(CommitSummary {
            inserted: inserts.len(),
            updated: updates.len(),
            deleted: deletes.len(),
        })
    }

    fn track(&mut self, entry: TrackedEntry, ident: (String, KeyTuple)) -> InstanceHandle {
        let handle = InstanceHandle(self.entries.len());
        self.entries.push(Some(entry));
        self.identity.insert(ident, handle);
        handle
    }

    fn entry(&self, handle: InstanceHandle) -> OrmResult<&TrackedEntry> {
        self.entries
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| stale_handle())
    }

    fn entry_mut(&mut self, handle: InstanceHandle) -> OrmResult<&mut TrackedEntry> {
        self.entries
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| stale_handle())
    }

    /// Order batch members parents-first along BelongsTo foreign keys,
    /// restricted to instances actually in the batch. Ties keep
    /// registration order.
    fn order_by_dependencies(&self, indices: &[usize]) -> OrmResult<Vec<usize>> {
        if indices.len() <= 1 {
            return Ok(indices.to_vec());
        }

        let mut by_identity: HashMap<(String, KeyTuple), usize> = HashMap::new();
        for (pos, &idx) in indices.iter().enumerate() {
            let entry = self.entries[idx].as_ref().expect("live entry");
            by_identity.insert((entry.table.clone(), entry.key.clone()), pos);
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); indices.len()];
        for (pos, &idx) in indices.iter().enumerate() {
            let entry = self.entries[idx].as_ref().expect("live entry");
            let descriptor = self.registry.descriptor(entry.instance.entity())?;
            for rel in descriptor
                .relationships()
                .iter()
                .filter(|r| r.cardinality.owns_foreign_key())
            {
                let target = self.registry.descriptor(&rel.target)?;
                let mut fk_key = Vec::with_capacity(rel.foreign_key.len());
                for column in &rel.foreign_key {
                    let value = entry
                        .instance
                        .value(column)
                        .and_then(KeyValue::from_database_value);
                    match value {
                        Some(v) => fk_key.push(v),
                        // A null foreign key references nothing in the batch
                        None => {
                            fk_key.clear();
                            break;
                        }
                    }
                }
                if fk_key.is_empty() {
                    continue;
                }
                if let Some(&parent) =
                    by_identity.get(&(target.table().to_string(), fk_key))
                {
                    if parent != pos {
                        deps[pos].push(parent);
                    }
                }
            }
        }

        let order = stable_topo_sort(indices.len(), &deps).ok_or_else(|| {
            OrmError::tracking(
                "batch",
                "cyclic foreign-key dependency among written instances",
            )
        })?;
        Ok(order.into_iter().map(|pos| indices[pos]).collect())
    }

    fn insert_op(&self, idx: usize) -> WriteOp {
        let entry = self.entries[idx].as_ref().expect("live entry");
        let columns: Vec<&str> = entry.instance.values().keys().map(|k| k.as_str()).collect();
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|n| format!("${}", n)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            entry.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        WriteOp {
            kind: WriteKind::Insert,
            table: entry.table.clone(),
            key: entry.key.clone(),
            sql,
            params: entry.instance.values().values().cloned().collect(),
        }
    }

    fn update_op(&self, idx: usize) -> WriteOp {
        let entry = self.entries[idx].as_ref().expect("live entry");
        let snapshot = entry.snapshot.as_ref().expect("loaded entry has snapshot");

        let mut sql = format!("UPDATE {} SET ", entry.table);
        let mut params = Vec::new();
        let mut counter = 1;
        let mut first = true;
        for (column, value) in entry.instance.values() {
            if snapshot.get(column) == Some(value) {
                continue;
            }
            if !first {
                sql.push_str(", ");
            }
            sql.push_str(&format!("{} = ${}", column, counter));
            params.push(value.clone());
            counter += 1;
            first = false;
        }

        sql.push_str(" WHERE ");
        append_original_predicate(&mut sql, &mut params, &mut counter, snapshot);

        WriteOp {
            kind: WriteKind::Update,
            table: entry.table.clone(),
            key: entry.key.clone(),
            sql,
            params,
        }
    }

    fn delete_op(&self, idx: usize) -> WriteOp {
        let entry = self.entries[idx].as_ref().expect("live entry");
        let snapshot = entry.snapshot.as_ref().expect("loaded entry has snapshot");

        let mut sql = format!("DELETE FROM {} WHERE ", entry.table);
        let mut params = Vec::new();
        let mut counter = 1;
        append_original_predicate(&mut sql, &mut params, &mut counter, snapshot);

        WriteOp {
            kind: WriteKind::Delete,
            table: entry.table.clone(),
            key: entry.key.clone(),
            sql,
            params,
        }
    }
}

/// Equality predicate over every original column value, which is the
/// optimistic concurrency check. Null originals compare with IS NULL.
fn append_original_predicate(
    sql: &mut String,
    params: &mut Vec<DatabaseValue>,
    counter: &mut usize,
    snapshot: &BTreeMap<String, DatabaseValue>,
) {
    let mut first = true;
    for (column, value) in snapshot {
        if !first {
            sql.push_str(" AND ");
        }
        if value.is_null() {
            sql.push_str(&format!("{} IS NULL", column));
        } else {
            sql.push_str(&format!("{} = ${}", column, counter));
            params.push(value.clone());
            *counter += 1;
        }
        first = false;
    }
}

fn stale_handle() -> OrmError {
    OrmError::tracking("instance", "handle is no longer tracked by this unit of work")
}
