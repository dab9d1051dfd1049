//! Scripted backend for tests
//!
//! A deterministic stand-in for the storage boundary: it records every
//! statement (text and parameters) and replays queued responses. With an
//! empty queue, writes report one affected row and reads return nothing,
//! so happy-path commit tests need no scripting at all.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DatabaseConnection, DatabasePool, DatabaseRow, DatabaseTransaction};
use crate::error::{OrmError, OrmResult};
use crate::value::DatabaseValue;

/// Ordered column-value pairs making up one scripted row
pub type RowValues = Vec<(String, DatabaseValue)>;

/// Build a scripted row from column-value pairs
pub fn row(pairs: &[(&str, DatabaseValue)]) -> RowValues {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// One queued response
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Rows(Vec<RowValues>),
    Affected(u64),
    Error(String),
}

/// A statement the backend was asked to run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

/// Connection and transaction lifecycle events, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Begin,
    Commit,
    Rollback,
    Lock(i64),
    Unlock(i64),
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<ScriptedResponse>,
    statements: Vec<ExecutedStatement>,
    events: Vec<BackendEvent>,
}

impl ScriptState {
    fn record(&mut self, sql: &str, params: &[DatabaseValue]) -> Option<ScriptedResponse> {
        self.statements.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.responses.pop_front()
    }
}

/// Scripted, in-memory implementation of [`DatabasePool`]
#[derive(Clone)]
pub struct ScriptedPool {
    state: Arc<Mutex<ScriptState>>,
    transactional_ddl: bool,
}

impl Default for ScriptedPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPool {
    /// Create a pool that reports transactional DDL support
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            transactional_ddl: true,
        }
    }

    /// Create a pool that auto-commits DDL (forces the sequential migration path)
    pub fn without_transactional_ddl() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            transactional_ddl: false,
        }
    }

    /// Queue a rows response for the next read
    pub fn push_rows(&self, rows: Vec<RowValues>) {
        self.lock().responses.push_back(ScriptedResponse::Rows(rows));
    }

    /// Queue a single-row response for the next read
    pub fn push_row(&self, row: RowValues) {
        self.push_rows(vec![row]);
    }

    /// Queue an affected-count response for the next write
    pub fn push_affected(&self, count: u64) {
        self.lock()
            .responses
            .push_back(ScriptedResponse::Affected(count));
    }

    /// Queue a backend failure for the next statement
    pub fn push_error(&self, message: &str) {
        self.lock()
            .responses
            .push_back(ScriptedResponse::Error(message.to_string()));
    }

    /// Every statement executed so far, in order
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.lock().statements.clone()
    }

    /// Statement texts only, for order assertions
    pub fn statement_sql(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Lifecycle events recorded so far, in order
    pub fn events(&self) -> Vec<BackendEvent> {
        self.lock().events.clone()
    }

    /// Forget recorded statements and events (queued responses are kept)
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.statements.clear();
        state.events.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("scripted backend poisoned")
    }
}

fn respond_execute(response: Option<ScriptedResponse>) -> OrmResult<u64> {
    match response {
        None => Ok(1),
        Some(ScriptedResponse::Affected(n)) => Ok(n),
        Some(ScriptedResponse::Rows(rows)) => Ok(rows.len() as u64),
        Some(ScriptedResponse::Error(message)) => Err(OrmError::storage("execute", message)),
    }
}

fn respond_fetch(response: Option<ScriptedResponse>) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
    match response {
        None | Some(ScriptedResponse::Affected(_)) => Ok(Vec::new()),
        Some(ScriptedResponse::Rows(rows)) => Ok(rows
            .into_iter()
            .map(|values| Box::new(ScriptedRow { values }) as Box<dyn DatabaseRow>)
            .collect()),
        Some(ScriptedResponse::Error(message)) => Err(OrmError::storage("fetch", message)),
    }
}

#[async_trait]
impl DatabasePool for ScriptedPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
        }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        respond_execute(self.lock().record(sql, params))
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        respond_fetch(self.lock().record(sql, params))
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(respond_fetch(self.lock().record(sql, params))?
            .into_iter()
            .next())
    }

    fn transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }
}

/// Scripted connection sharing the pool's state
pub struct ScriptedConnection {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("scripted backend poisoned")
    }
}

#[async_trait]
impl DatabaseConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        respond_execute(self.lock().record(sql, params))
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        respond_fetch(self.lock().record(sql, params))
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(respond_fetch(self.lock().record(sql, params))?
            .into_iter()
            .next())
    }

    async fn begin<'a>(&'a mut self) -> OrmResult<Box<dyn DatabaseTransaction + 'a>> {
        self.lock().events.push(BackendEvent::Begin);
        Ok(Box::new(ScriptedTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn lock_exclusive(&mut self, key: i64) -> OrmResult<()> {
        self.lock().events.push(BackendEvent::Lock(key));
        Ok(())
    }

    async fn unlock(&mut self, key: i64) -> OrmResult<()> {
        self.lock().events.push(BackendEvent::Unlock(key));
        Ok(())
    }
}

/// Scripted transaction sharing the pool's state
pub struct ScriptedTransaction {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransaction {
    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("scripted backend poisoned")
    }
}

#[async_trait]
impl DatabaseTransaction for ScriptedTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        respond_execute(self.lock().record(sql, params))
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        respond_fetch(self.lock().record(sql, params))
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        self.lock().events.push(BackendEvent::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        self.lock().events.push(BackendEvent::Rollback);
        Ok(())
    }
}

/// One scripted row, preserving column order
pub struct ScriptedRow {
    values: RowValues,
}

impl ScriptedRow {
    /// Build a row directly from column-value pairs
    pub fn from_values(values: RowValues) -> Self {
        Self { values }
    }
}

impl DatabaseRow for ScriptedRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.values
            .get(index)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::storage("fetch", format!("column index {} out of range", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.values
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::storage("fetch", format!("column '{}' not found", name)))
    }

    fn column_count(&self) -> usize {
        self.values.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.values.iter().map(|(name, _)| name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_statements_and_replays_responses() {
        let pool = ScriptedPool::new();
        pool.push_affected(3);
        pool.push_row(row(&[("id", DatabaseValue::Int64(1))]));

        let affected = pool
            .execute("DELETE FROM things", &[])
            .await
            .unwrap();
        assert_eq!(affected, 3);

        let found = pool
            .fetch_optional("SELECT id FROM things", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get_by_name("id").unwrap(), DatabaseValue::Int64(1));

        assert_eq!(pool.statement_sql().len(), 2);
    }

    #[tokio::test]
    async fn test_default_responses() {
        let pool = ScriptedPool::new();
        assert_eq!(pool.execute("UPDATE t SET a = $1", &[]).await.unwrap(), 1);
        assert!(pool.fetch_optional("SELECT 1", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_events() {
        let pool = ScriptedPool::new();
        let mut conn = pool.acquire().await.unwrap();
        let tx = conn.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(pool.events(), vec![BackendEvent::Begin, BackendEvent::Rollback]);
    }
}
