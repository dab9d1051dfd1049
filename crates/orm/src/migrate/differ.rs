//! Migration differ
//!
//! Compares two schema snapshots and produces an ordered operation list.
//! Tables, columns, indexes, and foreign keys are matched by name; renames
//! are deliberately unsupported and appear as drop+add. The output order is
//! fully deterministic: a fixed kind order, then table name, then member
//! name, so identical snapshot pairs always yield byte-identical scripts.

use tracing::debug;

use super::operation::MigrationOperation;
use crate::schema::{SchemaSnapshot, TableSnapshot};

/// Diff two snapshots into an ordered operation list.
///
/// `diff(s, s)` is always empty. Creating constraints waits until every
/// added table exists; dropping constraints happens before any table goes.
pub fn diff(previous: &SchemaSnapshot, current: &SchemaSnapshot) -> Vec<MigrationOperation> {
    let mut operations = Vec::new();

    for table in &previous.tables {
        match current.table(&table.name) {
            None => {
                // Inbound constraints from surviving tables show up in their
                // own comparison; the dropped table's own constraints must
                // go first explicitly.
                for fk in &table.foreign_keys {
                    operations.push(MigrationOperation::DropForeignKey {
                        table: table.name.clone(),
                        foreign_key: fk.clone(),
                    });
                }
                for index in &table.indexes {
                    operations.push(MigrationOperation::DropIndex {
                        table: table.name.clone(),
                        index: index.clone(),
                    });
                }
                operations.push(MigrationOperation::DropTable {
                    table: table.clone(),
                });
            }
            Some(now) => diff_table(table, now, &mut operations),
        }
    }

    for table in &current.tables {
        if previous.table(&table.name).is_none() {
            operations.push(MigrationOperation::AddTable {
                table: table.clone(),
            });
            for index in &table.indexes {
                operations.push(MigrationOperation::AddIndex {
                    table: table.name.clone(),
                    index: index.clone(),
                });
            }
            for fk in &table.foreign_keys {
                operations.push(MigrationOperation::AddForeignKey {
                    table: table.name.clone(),
                    foreign_key: fk.clone(),
                });
            }
        }
    }

    operations.sort_by(|a, b| {
        a.kind_rank()
            .cmp(&b.kind_rank())
            .then_with(|| a.table().cmp(b.table()))
            .then_with(|| a.member_name().cmp(b.member_name()))
    });

    debug!("computed schema diff with {} operations", operations.len());
    operations
}

fn diff_table(previous: &TableSnapshot, current: &TableSnapshot, out: &mut Vec<MigrationOperation>) {
    for column in &previous.columns {
        match current.column(&column.name) {
            None => out.push(MigrationOperation::DropColumn {
                table: previous.name.clone(),
                column: column.clone(),
            }),
            Some(now) if now != column => out.push(MigrationOperation::AlterColumn {
                table: previous.name.clone(),
                from: column.clone(),
                to: now.clone(),
            }),
            Some(_) => {}
        }
    }
    for column in &current.columns {
        if previous.column(&column.name).is_none() {
            out.push(MigrationOperation::AddColumn {
                table: previous.name.clone(),
                column: column.clone(),
            });
        }
    }

    // Indexes and foreign keys have no alter form; a change is drop+add.
    for index in &previous.indexes {
        match current.index(&index.name) {
            Some(now) if now == index => {}
            _ => out.push(MigrationOperation::DropIndex {
                table: previous.name.clone(),
                index: index.clone(),
            }),
        }
    }
    for index in &current.indexes {
        match previous.index(&index.name) {
            Some(was) if was == index => {}
            _ => out.push(MigrationOperation::AddIndex {
                table: previous.name.clone(),
                index: index.clone(),
            }),
        }
    }

    for fk in &previous.foreign_keys {
        match current.foreign_key(&fk.name) {
            Some(now) if now == fk => {}
            _ => out.push(MigrationOperation::DropForeignKey {
                table: previous.name.clone(),
                foreign_key: fk.clone(),
            }),
        }
    }
    for fk in &current.foreign_keys {
        match previous.foreign_key(&fk.name) {
            Some(was) if was == fk => {}
            _ => out.push(MigrationOperation::AddForeignKey {
                table: previous.name.clone(),
                foreign_key: fk.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, EntityDef, ForeignKeySnapshot, ModelRegistry};

    fn library_snapshot(with_email: bool) -> SchemaSnapshot {
        let mut registry = ModelRegistry::new();
        let mut authors = EntityDef::new("authors")
            .key("id", ColumnType::Uuid)
            .column("name", ColumnType::Text);
        if with_email {
            authors = authors.nullable_column("email", ColumnType::Text);
        }
        registry.register(authors).unwrap();
        registry
            .register(
                EntityDef::new("books")
                    .key("id", ColumnType::Uuid)
                    .column("title", ColumnType::Text)
                    .column("author_id", ColumnType::Uuid)
                    .belongs_to("author", "authors", &["author_id"]),
            )
            .unwrap();
        registry.seal().unwrap();
        registry.snapshot()
    }

    #[test]
    fn test_identical_snapshots_diff_empty() {
        let snapshot = library_snapshot(true);
        assert!(diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_added_nullable_column_is_one_operation() {
        let previous = library_snapshot(false);
        let current = library_snapshot(true);
        let operations = diff(&previous, &current);
        assert_eq!(operations.len(), 1);
        match &operations[0] {
            MigrationOperation::AddColumn { table, column } => {
                assert_eq!(table, "authors");
                assert_eq!(column.name, "email");
                assert!(column.nullable);
            }
            other => panic!("expected AddColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_fresh_schema_orders_tables_before_constraints() {
        let current = library_snapshot(false);
        let operations = diff(&SchemaSnapshot::empty(), &current);
        let add_fk_pos = operations
            .iter()
            .position(|op| matches!(op, MigrationOperation::AddForeignKey { .. }))
            .unwrap();
        let last_add_table = operations
            .iter()
            .rposition(|op| matches!(op, MigrationOperation::AddTable { .. }))
            .unwrap();
        assert!(last_add_table < add_fk_pos);
    }

    #[test]
    fn test_dropped_schema_orders_constraints_before_tables() {
        let previous = library_snapshot(false);
        let operations = diff(&previous, &SchemaSnapshot::empty());
        let drop_fk_pos = operations
            .iter()
            .position(|op| matches!(op, MigrationOperation::DropForeignKey { .. }))
            .unwrap();
        let first_drop_table = operations
            .iter()
            .position(|op| matches!(op, MigrationOperation::DropTable { .. }))
            .unwrap();
        assert!(drop_fk_pos < first_drop_table);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let previous = library_snapshot(false);
        let mut current = library_snapshot(true);
        current.tables[0].columns.push(ColumnDef {
            name: "bio".to_string(),
            column_type: ColumnType::Text,
            nullable: true,
            is_key: false,
        });
        current.tables[1].foreign_keys.push(ForeignKeySnapshot {
            name: "fk_books_editor".to_string(),
            columns: vec!["editor_id".to_string()],
            references_table: "authors".to_string(),
            references_columns: vec!["id".to_string()],
        });

        let first = diff(&previous, &current);
        let second = diff(&previous, &current);
        assert_eq!(first, second);
        // Columns of the same kind sort by name regardless of declaration order
        let adds: Vec<_> = first
            .iter()
            .filter_map(|op| match op {
                MigrationOperation::AddColumn { column, .. } => Some(column.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(adds, vec!["bio".to_string(), "email".to_string()]);
    }

    #[test]
    fn test_type_change_is_alter() {
        let previous = library_snapshot(false);
        let mut current = library_snapshot(false);
        current.tables[0].columns[1].column_type = ColumnType::VarChar(200);
        let operations = diff(&previous, &current);
        assert_eq!(operations.len(), 1);
        assert!(matches!(
            operations[0],
            MigrationOperation::AlterColumn { .. }
        ));
    }
}
