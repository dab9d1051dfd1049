//! Migration history
//!
//! One reserved, append-only table records every applied migration: its id,
//! a monotonic sequence number, the apply timestamp, a checksum of the
//! forward script, and the serialized forward and reverse operation lists.
//! The sequence order defines the schema timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{DatabaseConnection, DatabaseRow};
use crate::error::{OrmError, OrmResult};
use crate::value::DatabaseValue;

/// Default name of the reserved history table
pub const HISTORY_TABLE: &str = "loam_migrations";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub seq: i64,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
}

/// Persisted forward and reverse scripts of one applied migration
#[derive(Debug, Clone)]
pub struct MigrationScripts {
    pub forward: String,
    pub reverse: String,
}

/// Access to the history table on a checked-out connection
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    table: String,
}

impl Default for MigrationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationHistory {
    /// History over the default reserved table
    pub fn new() -> Self {
        Self {
            table: HISTORY_TABLE.to_string(),
        }
    }

    /// History over a custom table name
    pub fn with_table(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    /// Name of the history table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist yet
    pub async fn ensure_table(&self, conn: &mut dyn DatabaseConnection) -> OrmResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id VARCHAR(255) PRIMARY KEY,\n    \
                seq BIGINT NOT NULL UNIQUE,\n    \
                applied_at TIMESTAMPTZ NOT NULL,\n    \
                checksum CHAR(64) NOT NULL,\n    \
                forward_script TEXT NOT NULL,\n    \
                reverse_script TEXT NOT NULL\n\
            )",
            self.table
        );
        conn.execute(&sql, &[]).await?;
        Ok(())
    }

    /// The most recently applied migration, if any
    pub async fn latest(
        &self,
        conn: &mut dyn DatabaseConnection,
    ) -> OrmResult<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT id, seq, applied_at, checksum FROM {} ORDER BY seq DESC LIMIT 1",
            self.table
        );
        let row = conn.fetch_optional(&sql, &[]).await?;
        row.map(|r| record_from_row(r.as_ref())).transpose()
    }

    /// Every applied migration, timeline order
    pub async fn applied(
        &self,
        conn: &mut dyn DatabaseConnection,
    ) -> OrmResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT id, seq, applied_at, checksum FROM {} ORDER BY seq",
            self.table
        );
        let rows = conn.fetch_all(&sql, &[]).await?;
        rows.iter().map(|r| record_from_row(r.as_ref())).collect()
    }

    /// The persisted scripts of one applied migration
    pub async fn scripts(
        &self,
        conn: &mut dyn DatabaseConnection,
        id: &str,
    ) -> OrmResult<Option<(MigrationRecord, MigrationScripts)>> {
        let sql = format!(
            "SELECT id, seq, applied_at, checksum, forward_script, reverse_script FROM {} WHERE id = $1",
            self.table
        );
        let row = conn
            .fetch_optional(&sql, &[DatabaseValue::String(id.to_string())])
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let record = record_from_row(row.as_ref())?;
        let scripts = MigrationScripts {
            forward: string_column(row.as_ref(), "forward_script")?,
            reverse: string_column(row.as_ref(), "reverse_script")?,
        };
        Ok(Some((record, scripts)))
    }

    /// INSERT statement appending one record
    pub fn insert_sql(
        &self,
        record: &MigrationRecord,
        scripts: &MigrationScripts,
    ) -> (String, Vec<DatabaseValue>) {
        (
            format!(
                "INSERT INTO {} (id, seq, applied_at, checksum, forward_script, reverse_script) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                self.table
            ),
            vec![
                DatabaseValue::String(record.id.clone()),
                DatabaseValue::Int64(record.seq),
                DatabaseValue::DateTime(record.applied_at),
                DatabaseValue::String(record.checksum.clone()),
                DatabaseValue::String(scripts.forward.clone()),
                DatabaseValue::String(scripts.reverse.clone()),
            ],
        )
    }

    /// DELETE statement removing one record after rollback
    pub fn delete_sql(&self, id: &str) -> (String, Vec<DatabaseValue>) {
        (
            format!("DELETE FROM {} WHERE id = $1", self.table),
            vec![DatabaseValue::String(id.to_string())],
        )
    }
}

fn record_from_row(row: &dyn DatabaseRow) -> OrmResult<MigrationRecord> {
    let seq = match row.get_by_name("seq")? {
        DatabaseValue::Int64(v) => v,
        DatabaseValue::Int32(v) => v as i64,
        other => {
            return Err(OrmError::storage(
                "migration history",
                format!("unexpected seq value {:?}", other),
            ))
        }
    };
    let applied_at = match row.get_by_name("applied_at")? {
        DatabaseValue::DateTime(v) => v,
        other => {
            return Err(OrmError::storage(
                "migration history",
                format!("unexpected applied_at value {:?}", other),
            ))
        }
    };
    Ok(MigrationRecord {
        id: string_column(row, "id")?,
        seq,
        applied_at,
        checksum: string_column(row, "checksum")?,
    })
}

fn string_column(row: &dyn DatabaseRow, name: &str) -> OrmResult<String> {
    match row.get_by_name(name)? {
        DatabaseValue::String(v) => Ok(v),
        other => Err(OrmError::storage(
            "migration history",
            format!("unexpected {} value {:?}", name, other),
        )),
    }
}
