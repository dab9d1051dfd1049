//! Migration applier
//!
//! Applies an operation list and records it in history, or rolls the latest
//! migration back from its persisted script. Both paths hold a cluster-wide
//! advisory lock for their whole duration; concurrent DDL application
//! without it can double-apply or corrupt history.

use chrono::Utc;
use tracing::{info, warn};

use super::checksum::compute_checksum;
use super::differ;
use super::history::{MigrationHistory, MigrationRecord, MigrationScripts};
use super::operation::MigrationOperation;
use crate::backend::{DatabaseConnection, DatabasePool};
use crate::error::{OrmError, OrmResult};
use crate::schema::SchemaSnapshot;

/// Advisory lock key guarding schema changes
pub const MIGRATION_LOCK_KEY: i64 = 0x6c6f_616d; // "loam"

/// One migration to apply: an id, the id it must follow, and its operations
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    pub id: String,
    /// Latest history id this plan expects; `None` for the first migration
    pub parent: Option<String>,
    pub operations: Vec<MigrationOperation>,
}

impl MigrationPlan {
    /// Build a plan from an explicit operation list
    pub fn new(id: &str, parent: Option<&str>, operations: Vec<MigrationOperation>) -> Self {
        Self {
            id: id.to_string(),
            parent: parent.map(|p| p.to_string()),
            operations,
        }
    }

    /// Build a plan by diffing two snapshots
    pub fn from_diff(
        id: &str,
        parent: Option<&str>,
        previous: &SchemaSnapshot,
        current: &SchemaSnapshot,
    ) -> Self {
        Self::new(id, parent, differ::diff(previous, current))
    }
}

/// Executes migration plans against the storage boundary
#[derive(Debug, Clone, Default)]
pub struct MigrationApplier {
    history: MigrationHistory,
}

impl MigrationApplier {
    /// Applier over the default history table
    pub fn new() -> Self {
        Self {
            history: MigrationHistory::new(),
        }
    }

    /// Applier over a custom history table
    pub fn with_history(history: MigrationHistory) -> Self {
        Self { history }
    }

    /// Apply a plan and append its history record.
    ///
    /// Refuses with `PrecedentMissing` when the plan's declared parent is
    /// not the latest recorded id. On transactional-DDL backends the whole
    /// plan and its record commit atomically; elsewhere operations run
    /// sequentially and a mid-sequence failure reports exactly which
    /// operations succeeded.
    pub async fn apply(
        &self,
        pool: &dyn DatabasePool,
        plan: &MigrationPlan,
    ) -> OrmResult<MigrationRecord> {
        let mut conn = pool.acquire().await?;
        conn.lock_exclusive(MIGRATION_LOCK_KEY).await?;
        let result = self
            .apply_locked(pool.transactional_ddl(), &mut *conn, plan)
            .await;
        // The lock releases on every exit path, including failure.
        conn.unlock(MIGRATION_LOCK_KEY).await.ok();
        result
    }

    async fn apply_locked(
        &self,
        transactional_ddl: bool,
        conn: &mut dyn DatabaseConnection,
        plan: &MigrationPlan,
    ) -> OrmResult<MigrationRecord> {
        self.history.ensure_table(conn).await?;

        let latest = self.history.latest(conn).await?;
        let found = latest.as_ref().map(|r| r.id.clone());
        if plan.parent != found {
            return Err(OrmError::PrecedentMissing {
                migration: plan.id.clone(),
                expected: plan.parent.clone(),
                found,
            });
        }

        let forward = serde_json::to_string(&plan.operations)?;
        let reversed: Vec<MigrationOperation> =
            plan.operations.iter().rev().cloned().collect();
        let reverse = serde_json::to_string(&reversed)?;
        let scripts = MigrationScripts { forward, reverse };
        let record = MigrationRecord {
            id: plan.id.clone(),
            seq: latest.map(|r| r.seq + 1).unwrap_or(1),
            applied_at: Utc::now(),
            checksum: compute_checksum(&scripts.forward),
        };

        info!(
            "applying migration '{}' ({} operations, transactional_ddl={})",
            plan.id,
            plan.operations.len(),
            transactional_ddl
        );

        if transactional_ddl {
            let mut tx = conn.begin().await?;
            for op in &plan.operations {
                if let Err(e) = tx.execute(&op.forward_sql(), &[]).await {
                    tx.rollback().await.ok();
                    warn!(
                        "migration '{}' rolled back at {}: {}",
                        plan.id,
                        op.describe(),
                        e
                    );
                    return Err(e);
                }
            }
            let (sql, params) = self.history.insert_sql(&record, &scripts);
            if let Err(e) = tx.execute(&sql, &params).await {
                tx.rollback().await.ok();
                return Err(e);
            }
            tx.commit().await?;
        } else {
            // DDL auto-commits here; there is nothing to roll back, so a
            // failure reports partial progress instead.
            let mut applied = Vec::with_capacity(plan.operations.len());
            for op in &plan.operations {
                if let Err(e) = conn.execute(&op.forward_sql(), &[]).await {
                    return Err(OrmError::PartialMigration {
                        migration: plan.id.clone(),
                        applied,
                        total: plan.operations.len(),
                        failed: op.describe(),
                        message: e.to_string(),
                    });
                }
                applied.push(op.describe());
            }
            let (sql, params) = self.history.insert_sql(&record, &scripts);
            conn.execute(&sql, &params).await?;
        }

        info!("migration '{}' applied as seq {}", plan.id, record.seq);
        Ok(record)
    }

    /// Roll back the latest applied migration from its persisted script.
    ///
    /// The reverse operations are never recomputed: they execute exactly as
    /// stored, in one transaction, and the record is removed afterwards.
    /// Only the latest record may be rolled back.
    pub async fn rollback(&self, pool: &dyn DatabasePool, id: &str) -> OrmResult<()> {
        let mut conn = pool.acquire().await?;
        conn.lock_exclusive(MIGRATION_LOCK_KEY).await?;
        let result = self.rollback_locked(&mut *conn, id).await;
        conn.unlock(MIGRATION_LOCK_KEY).await.ok();
        result
    }

    async fn rollback_locked(
        &self,
        conn: &mut dyn DatabaseConnection,
        id: &str,
    ) -> OrmResult<()> {
        self.history.ensure_table(conn).await?;

        let latest = self.history.latest(conn).await?;
        let found = latest.as_ref().map(|r| r.id.clone());
        if found.as_deref() != Some(id) {
            return Err(OrmError::PrecedentMissing {
                migration: id.to_string(),
                expected: Some(id.to_string()),
                found,
            });
        }

        let (record, scripts) = self
            .history
            .scripts(conn, id)
            .await?
            .ok_or_else(|| OrmError::NotFound(self.history.table().to_string()))?;

        if compute_checksum(&scripts.forward) != record.checksum {
            return Err(OrmError::storage(
                "migration history",
                format!("checksum mismatch for migration '{}'", id),
            ));
        }

        let operations: Vec<MigrationOperation> = serde_json::from_str(&scripts.reverse)?;
        info!(
            "rolling back migration '{}' ({} operations)",
            id,
            operations.len()
        );

        let mut tx = conn.begin().await?;
        for op in &operations {
            if let Err(e) = tx.execute(&op.reverse_sql(), &[]).await {
                tx.rollback().await.ok();
                warn!("rollback of '{}' aborted at {}: {}", id, op.describe(), e);
                return Err(e);
            }
        }
        let (sql, params) = self.history.delete_sql(id);
        if let Err(e) = tx.execute(&sql, &params).await {
            tx.rollback().await.ok();
            return Err(e);
        }
        tx.commit().await?;

        info!("migration '{}' rolled back", id);
        Ok(())
    }

    /// Every applied migration, timeline order
    pub async fn applied(&self, pool: &dyn DatabasePool) -> OrmResult<Vec<MigrationRecord>> {
        let mut conn = pool.acquire().await?;
        self.history.ensure_table(&mut *conn).await?;
        self.history.applied(&mut *conn).await
    }

    /// The latest applied migration, if any
    pub async fn latest(&self, pool: &dyn DatabasePool) -> OrmResult<Option<MigrationRecord>> {
        let mut conn = pool.acquire().await?;
        self.history.ensure_table(&mut *conn).await?;
        self.history.latest(&mut *conn).await
    }
}
