//! Storage boundary traits
//!
//! The core never talks to a driver directly: queries, commits, and
//! migrations all go through these object-safe traits. Connections are
//! acquired for the duration of one query or commit and released on every
//! exit path.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::OrmResult;
use crate::value::DatabaseValue;

pub mod postgres;
pub mod testing;

pub use postgres::PostgresPool;

/// Abstract connection pool. The pool is the shared scarce resource; the
/// tracking and migration layers borrow it per operation.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a dedicated connection from the pool
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>>;

    /// Execute a statement directly on the pool, returning the affected count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query directly on the pool and return all result rows
    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query directly on the pool and return the first row, if any
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Whether DDL statements participate in transactions on this backend.
    /// Backends that auto-commit DDL get the sequential migration path with
    /// partial-progress reporting instead.
    fn transactional_ddl(&self) -> bool;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;
}

/// A dedicated connection checked out of the pool
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a statement and return the affected count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return all result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first row, if any
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Begin a transaction on this connection
    async fn begin<'a>(&'a mut self) -> OrmResult<Box<dyn DatabaseTransaction + 'a>>;

    /// Take an exclusive advisory lock, blocking until it is granted.
    /// The lock is scoped to this connection's session.
    async fn lock_exclusive(&mut self, key: i64) -> OrmResult<()>;

    /// Release an advisory lock taken by `lock_exclusive`
    async fn unlock(&mut self, key: i64) -> OrmResult<()>;
}

/// An open transaction. Dropping without commit rolls back.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query within the transaction and return all result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// One result row
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Number of columns
    fn column_count(&self) -> usize;

    /// Column names, result order
    fn column_names(&self) -> Vec<String>;

    /// Convert the row to a JSON object
    fn to_json(&self) -> OrmResult<JsonValue> {
        let mut map = serde_json::Map::new();
        for name in self.column_names() {
            map.insert(name.clone(), self.get_by_name(&name)?.to_json());
        }
        Ok(JsonValue::Object(map))
    }

    /// Convert the row to a name-value map
    fn to_map(&self) -> OrmResult<HashMap<String, DatabaseValue>> {
        let mut map = HashMap::new();
        for name in self.column_names() {
            let value = self.get_by_name(&name)?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Pool sizing and timeout configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
        }
    }
}
