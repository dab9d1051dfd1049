//! Migration sequencing over the scripted backend: apply, refuse
//! out-of-sequence plans, report partial progress on non-transactional
//! backends, and roll back from the persisted script.

use chrono::Utc;

use loam_orm::backend::testing::{row, BackendEvent, ScriptedPool};
use loam_orm::migrate::{
    compute_checksum, diff, MigrationApplier, MigrationOperation, MigrationPlan,
    MIGRATION_LOCK_KEY,
};
use loam_orm::schema::{ColumnDef, ColumnType, EntityDef, ModelRegistry, SchemaSnapshot};
use loam_orm::value::DatabaseValue;
use loam_orm::OrmError;

fn author_snapshot(with_email: bool) -> SchemaSnapshot {
    let mut registry = ModelRegistry::new();
    let mut authors = EntityDef::new("authors")
        .key("id", ColumnType::Uuid)
        .column("name", ColumnType::Text);
    if with_email {
        authors = authors.nullable_column("email", ColumnType::Text);
    }
    registry.register(authors).unwrap();
    registry.seal().unwrap();
    registry.snapshot()
}

fn email_column_ops() -> Vec<MigrationOperation> {
    diff(&author_snapshot(false), &author_snapshot(true))
}

/// History row as the backend would return it for one applied migration
fn history_row(id: &str, seq: i64, ops: &[MigrationOperation]) -> Vec<(String, DatabaseValue)> {
    let forward = serde_json::to_string(ops).unwrap();
    let reversed: Vec<MigrationOperation> = ops.iter().rev().cloned().collect();
    let reverse = serde_json::to_string(&reversed).unwrap();
    row(&[
        ("id", DatabaseValue::String(id.to_string())),
        ("seq", DatabaseValue::Int64(seq)),
        ("applied_at", DatabaseValue::DateTime(Utc::now())),
        ("checksum", DatabaseValue::String(compute_checksum(&forward))),
        ("forward_script", DatabaseValue::String(forward)),
        ("reverse_script", DatabaseValue::String(reverse)),
    ])
}

#[tokio::test]
async fn apply_executes_operations_and_records_history() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();
    let plan = MigrationPlan::new("0001_add_email", None, email_column_ops());

    let record = applier.apply(&pool, &plan).await.unwrap();
    assert_eq!(record.id, "0001_add_email");
    assert_eq!(record.seq, 1);
    assert_eq!(record.checksum.len(), 64);

    let sql = pool.statement_sql();
    // ensure table, latest probe, one DDL operation, history insert
    assert_eq!(sql.len(), 4);
    assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS loam_migrations"));
    assert_eq!(sql[2], "ALTER TABLE authors ADD COLUMN email TEXT");
    assert!(sql[3].starts_with("INSERT INTO loam_migrations"));

    let events = pool.events();
    assert_eq!(events[0], BackendEvent::Lock(MIGRATION_LOCK_KEY));
    assert!(events.contains(&BackendEvent::Begin));
    assert!(events.contains(&BackendEvent::Commit));
    assert_eq!(*events.last().unwrap(), BackendEvent::Unlock(MIGRATION_LOCK_KEY));
}

#[tokio::test]
async fn apply_refuses_wrong_predecessor() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();

    // History already holds 0001; this plan claims to follow nothing.
    pool.push_affected(0); // ensure table
    pool.push_row(history_row("0001_add_email", 1, &email_column_ops()));

    let plan = MigrationPlan::new("0002_other", None, Vec::new());
    let err = applier.apply(&pool, &plan).await.unwrap_err();
    match err {
        OrmError::PrecedentMissing {
            migration,
            expected,
            found,
        } => {
            assert_eq!(migration, "0002_other");
            assert_eq!(expected, None);
            assert_eq!(found, Some("0001_add_email".to_string()));
        }
        other => panic!("expected PrecedentMissing, got {:?}", other),
    }

    // The advisory lock is released even on refusal.
    assert_eq!(
        *pool.events().last().unwrap(),
        BackendEvent::Unlock(MIGRATION_LOCK_KEY)
    );
}

#[tokio::test]
async fn transactional_failure_rolls_back_and_keeps_history_untouched() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();
    let plan = MigrationPlan::new("0001_add_email", None, email_column_ops());

    pool.push_affected(0); // ensure table
    pool.push_rows(Vec::new()); // latest: empty history
    pool.push_error("syntax error near ALTER");

    let err = applier.apply(&pool, &plan).await.unwrap_err();
    assert!(matches!(err, OrmError::Storage { .. }));

    let events = pool.events();
    assert!(events.contains(&BackendEvent::Rollback));
    assert!(!events.contains(&BackendEvent::Commit));
    // No history insert was attempted after the failure.
    assert!(!pool
        .statement_sql()
        .iter()
        .any(|s| s.starts_with("INSERT INTO loam_migrations")));
}

#[tokio::test]
async fn non_transactional_failure_reports_partial_progress() {
    let pool = ScriptedPool::without_transactional_ddl();
    let applier = MigrationApplier::new();

    let operations = vec![
        MigrationOperation::AddColumn {
            table: "authors".to_string(),
            column: ColumnDef {
                name: "email".to_string(),
                column_type: ColumnType::Text,
                nullable: true,
                is_key: false,
            },
        },
        MigrationOperation::AddColumn {
            table: "authors".to_string(),
            column: ColumnDef {
                name: "bio".to_string(),
                column_type: ColumnType::Text,
                nullable: true,
                is_key: false,
            },
        },
    ];
    let plan = MigrationPlan::new("0001_profile", None, operations);

    pool.push_affected(0); // ensure table
    pool.push_rows(Vec::new()); // latest: empty history
    pool.push_affected(0); // first op succeeds
    pool.push_error("disk full"); // second op fails mid-sequence

    let err = applier.apply(&pool, &plan).await.unwrap_err();
    match err {
        OrmError::PartialMigration {
            migration,
            applied,
            total,
            failed,
            ..
        } => {
            assert_eq!(migration, "0001_profile");
            assert_eq!(applied, vec!["add_column authors.email".to_string()]);
            assert_eq!(total, 2);
            assert_eq!(failed, "add_column authors.bio");
        }
        other => panic!("expected PartialMigration, got {:?}", other),
    }
    // Sequential path never opened a transaction.
    assert!(!pool.events().contains(&BackendEvent::Begin));
}

#[tokio::test]
async fn rollback_replays_the_persisted_reverse_script() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();
    let ops = email_column_ops();

    pool.push_affected(0); // ensure table
    pool.push_row(history_row("0001_add_email", 1, &ops)); // latest
    pool.push_row(history_row("0001_add_email", 1, &ops)); // scripts lookup

    applier.rollback(&pool, "0001_add_email").await.unwrap();

    let sql = pool.statement_sql();
    assert!(sql.contains(&"ALTER TABLE authors DROP COLUMN email".to_string()));
    assert!(sql
        .iter()
        .any(|s| s.starts_with("DELETE FROM loam_migrations")));

    let events = pool.events();
    assert_eq!(events[0], BackendEvent::Lock(MIGRATION_LOCK_KEY));
    assert!(events.contains(&BackendEvent::Commit));
    assert_eq!(*events.last().unwrap(), BackendEvent::Unlock(MIGRATION_LOCK_KEY));
}

#[tokio::test]
async fn rollback_refuses_non_latest_migration() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();

    pool.push_affected(0); // ensure table
    pool.push_row(history_row("0002_later", 2, &[])); // latest is someone else

    let err = applier.rollback(&pool, "0001_add_email").await.unwrap_err();
    assert!(matches!(err, OrmError::PrecedentMissing { .. }));
}

#[tokio::test]
async fn rollback_detects_history_tampering() {
    let pool = ScriptedPool::new();
    let applier = MigrationApplier::new();
    let ops = email_column_ops();

    let mut tampered = history_row("0001_add_email", 1, &ops);
    for (name, value) in tampered.iter_mut() {
        if name == "forward_script" {
            *value = DatabaseValue::String("[]".to_string());
        }
    }

    pool.push_affected(0); // ensure table
    pool.push_row(history_row("0001_add_email", 1, &ops)); // latest
    pool.push_row(tampered); // scripts lookup with mismatching checksum

    let err = applier.rollback(&pool, "0001_add_email").await.unwrap_err();
    match err {
        OrmError::Storage { message, .. } => assert!(message.contains("checksum")),
        other => panic!("expected Storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn email_column_cycle_converges() {
    // diff is idempotent on equal snapshots...
    let with_email = author_snapshot(true);
    assert!(diff(&with_email, &with_email).is_empty());

    // ...the email addition is exactly one nullable AddColumn...
    let ops = email_column_ops();
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        MigrationOperation::AddColumn { table, column } => {
            assert_eq!(table, "authors");
            assert_eq!(column.name, "email");
            assert!(column.nullable);
        }
        other => panic!("expected AddColumn, got {:?}", other),
    }

    // ...and its reverse restores the pre-apply schema exactly: re-applying
    // the same diff to the rolled-back model is the original operation list.
    assert_eq!(ops[0].reverse_sql(), "ALTER TABLE authors DROP COLUMN email");
    assert_eq!(email_column_ops(), ops);
}
