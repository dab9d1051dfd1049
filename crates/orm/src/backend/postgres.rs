//! PostgreSQL backend
//!
//! Implements the storage boundary traits over sqlx. Advisory locks use
//! `pg_advisory_lock`, which is session-scoped, so lock and unlock must run
//! on the same checked-out connection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Acquire, Column, Pool, Postgres, Row as SqlxRow, TypeInfo};

use super::{DatabaseConnection, DatabasePool, DatabaseRow, DatabaseTransaction, PoolConfig};
use crate::error::{OrmError, OrmResult};
use crate::value::DatabaseValue;

/// PostgreSQL connection pool
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    /// Connect to a PostgreSQL database
    pub async fn connect(database_url: &str, config: PoolConfig) -> OrmResult<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_seconds));

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(std::time::Duration::from_secs(idle_timeout));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| OrmError::Connection(format!("failed to create pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing sqlx pool
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| OrmError::Connection(format!("failed to acquire connection: {}", e)))?;
        Ok(Box::new(PostgresConnection { conn }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::storage("execute", e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrmError::storage("fetch", e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OrmError::storage("fetch", e.to_string()))?;
        Ok(row.map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>))
    }

    fn transactional_ddl(&self) -> bool {
        // PostgreSQL DDL is transactional
        true
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// A connection checked out of a [`PostgresPool`]
pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| OrmError::storage("execute", e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| OrmError::storage("fetch", e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| OrmError::storage("fetch", e.to_string()))?;
        Ok(row.map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>))
    }

    async fn begin<'a>(&'a mut self) -> OrmResult<Box<dyn DatabaseTransaction + 'a>> {
        let tx = self
            .conn
            .begin()
            .await
            .map_err(|e| OrmError::storage("begin transaction", e.to_string()))?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn lock_exclusive(&mut self, key: i64) -> OrmResult<()> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| OrmError::storage("advisory lock", e.to_string()))?;
        Ok(())
    }

    async fn unlock(&mut self, key: i64) -> OrmResult<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| OrmError::storage("advisory unlock", e.to_string()))?;
        Ok(())
    }
}

/// An open transaction on a checked-out connection
pub struct PostgresTransaction<'c> {
    tx: Option<sqlx::Transaction<'c, Postgres>>,
}

#[async_trait]
impl<'c> DatabaseTransaction for PostgresTransaction<'c> {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| OrmError::storage("execute", "transaction already completed"))?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| OrmError::storage("execute", e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| OrmError::storage("fetch", "transaction already completed"))?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| OrmError::storage("fetch", e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow { row }) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::storage("commit", "transaction already completed"))?;
        tx.commit()
            .await
            .map_err(|e| OrmError::storage("commit", e.to_string()))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::storage("rollback", "transaction already completed"))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::storage("rollback", e.to_string()))
    }
}

/// One PostgreSQL result row
pub struct PostgresRow {
    row: PgRow,
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        decode_column(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| OrmError::storage("fetch", format!("column '{}' not found", name)))?;
        decode_column(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Decode one column of a PgRow into a DatabaseValue based on its declared type
fn decode_column(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let column = row
        .columns()
        .get(index)
        .ok_or_else(|| OrmError::storage("fetch", format!("column index {} out of range", index)))?;
    let type_name = column.type_info().name().to_uppercase();

    let decode_err =
        |e: sqlx::Error| OrmError::storage("decode", format!("column {}: {}", index, e));

    let value = match type_name.as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map_err(decode_err)?
            .map(|v| DatabaseValue::Int32(v as i32)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Int32),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Int64),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map_err(decode_err)?
            .map(|v| DatabaseValue::Float64(v as f64)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Float64),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::String),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Uuid),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::DateTime),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map_err(decode_err)?
            .map(|v| DatabaseValue::DateTime(v.and_utc())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Date),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Json),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map_err(decode_err)?
            .map(DatabaseValue::Bytes),
        other => {
            return Err(OrmError::storage(
                "decode",
                format!("unsupported column type '{}'", other),
            ))
        }
    };

    Ok(value.unwrap_or(DatabaseValue::Null))
}
