//! Migration operations
//!
//! Each operation is a self-describing, reversible schema change: it renders
//! its own forward and reverse DDL. Drops carry the full dropped definition
//! so the reverse direction can recreate what was removed.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnDef, ForeignKeySnapshot, IndexDef, TableSnapshot};

/// One atomic, reversible schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MigrationOperation {
    AddTable {
        table: TableSnapshot,
    },
    DropTable {
        table: TableSnapshot,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: ColumnDef,
    },
    AlterColumn {
        table: String,
        from: ColumnDef,
        to: ColumnDef,
    },
    AddIndex {
        table: String,
        index: IndexDef,
    },
    DropIndex {
        table: String,
        index: IndexDef,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeySnapshot,
    },
    DropForeignKey {
        table: String,
        foreign_key: ForeignKeySnapshot,
    },
}

impl MigrationOperation {
    /// DDL applying this operation
    pub fn forward_sql(&self) -> String {
        match self {
            MigrationOperation::AddTable { table } => create_table_sql(table),
            MigrationOperation::DropTable { table } => format!("DROP TABLE {}", table.name),
            MigrationOperation::AddColumn { table, column } => {
                format!("ALTER TABLE {} ADD COLUMN {}", table, column.sql())
            }
            MigrationOperation::DropColumn { table, column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", table, column.name)
            }
            MigrationOperation::AlterColumn { table, from, to } => {
                alter_column_sql(table, from, to)
            }
            MigrationOperation::AddIndex { table, index } => create_index_sql(table, index),
            MigrationOperation::DropIndex { index, .. } => {
                format!("DROP INDEX {}", index.name)
            }
            MigrationOperation::AddForeignKey { table, foreign_key } => {
                add_foreign_key_sql(table, foreign_key)
            }
            MigrationOperation::DropForeignKey { table, foreign_key } => {
                format!("ALTER TABLE {} DROP CONSTRAINT {}", table, foreign_key.name)
            }
        }
    }

    /// DDL undoing this operation
    pub fn reverse_sql(&self) -> String {
        match self {
            MigrationOperation::AddTable { table } => format!("DROP TABLE {}", table.name),
            MigrationOperation::DropTable { table } => create_table_sql(table),
            MigrationOperation::AddColumn { table, column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", table, column.name)
            }
            MigrationOperation::DropColumn { table, column } => {
                format!("ALTER TABLE {} ADD COLUMN {}", table, column.sql())
            }
            MigrationOperation::AlterColumn { table, from, to } => {
                alter_column_sql(table, to, from)
            }
            MigrationOperation::AddIndex { index, .. } => {
                format!("DROP INDEX {}", index.name)
            }
            MigrationOperation::DropIndex { table, index } => create_index_sql(table, index),
            MigrationOperation::AddForeignKey { table, foreign_key } => {
                format!("ALTER TABLE {} DROP CONSTRAINT {}", table, foreign_key.name)
            }
            MigrationOperation::DropForeignKey { table, foreign_key } => {
                add_foreign_key_sql(table, foreign_key)
            }
        }
    }

    /// Short label used in logs and partial-progress reports
    pub fn describe(&self) -> String {
        match self {
            MigrationOperation::AddTable { table } => format!("add_table {}", table.name),
            MigrationOperation::DropTable { table } => format!("drop_table {}", table.name),
            MigrationOperation::AddColumn { table, column } => {
                format!("add_column {}.{}", table, column.name)
            }
            MigrationOperation::DropColumn { table, column } => {
                format!("drop_column {}.{}", table, column.name)
            }
            MigrationOperation::AlterColumn { table, to, .. } => {
                format!("alter_column {}.{}", table, to.name)
            }
            MigrationOperation::AddIndex { index, .. } => format!("add_index {}", index.name),
            MigrationOperation::DropIndex { index, .. } => format!("drop_index {}", index.name),
            MigrationOperation::AddForeignKey { foreign_key, .. } => {
                format!("add_foreign_key {}", foreign_key.name)
            }
            MigrationOperation::DropForeignKey { foreign_key, .. } => {
                format!("drop_foreign_key {}", foreign_key.name)
            }
        }
    }

    /// The table this operation touches
    pub fn table(&self) -> &str {
        match self {
            MigrationOperation::AddTable { table } | MigrationOperation::DropTable { table } => {
                &table.name
            }
            MigrationOperation::AddColumn { table, .. }
            | MigrationOperation::DropColumn { table, .. }
            | MigrationOperation::AlterColumn { table, .. }
            | MigrationOperation::AddIndex { table, .. }
            | MigrationOperation::DropIndex { table, .. }
            | MigrationOperation::AddForeignKey { table, .. }
            | MigrationOperation::DropForeignKey { table, .. } => table,
        }
    }

    /// Fixed execution rank; the differ orders by it so that created tables
    /// exist before constraints reference them, and constraints are gone
    /// before their tables are.
    pub(crate) fn kind_rank(&self) -> u8 {
        match self {
            MigrationOperation::DropForeignKey { .. } => 0,
            MigrationOperation::DropIndex { .. } => 1,
            MigrationOperation::DropTable { .. } => 2,
            MigrationOperation::AddTable { .. } => 3,
            MigrationOperation::DropColumn { .. } => 4,
            MigrationOperation::AlterColumn { .. } => 5,
            MigrationOperation::AddColumn { .. } => 6,
            MigrationOperation::AddIndex { .. } => 7,
            MigrationOperation::AddForeignKey { .. } => 8,
        }
    }

    /// Secondary sort key within a kind: the column, index, or constraint name
    pub(crate) fn member_name(&self) -> &str {
        match self {
            MigrationOperation::AddTable { .. } | MigrationOperation::DropTable { .. } => "",
            MigrationOperation::AddColumn { column, .. }
            | MigrationOperation::DropColumn { column, .. } => &column.name,
            MigrationOperation::AlterColumn { to, .. } => &to.name,
            MigrationOperation::AddIndex { index, .. }
            | MigrationOperation::DropIndex { index, .. } => &index.name,
            MigrationOperation::AddForeignKey { foreign_key, .. }
            | MigrationOperation::DropForeignKey { foreign_key, .. } => &foreign_key.name,
        }
    }
}

fn create_table_sql(table: &TableSnapshot) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(|c| c.sql()).collect();
    if !table.primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
    }
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        table.name,
        parts.join(",\n    ")
    )
}

fn create_index_sql(table: &str, index: &IndexDef) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        index.name,
        table,
        index.columns.join(", ")
    )
}

fn add_foreign_key_sql(table: &str, foreign_key: &ForeignKeySnapshot) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        table,
        foreign_key.name,
        foreign_key.columns.join(", "),
        foreign_key.references_table,
        foreign_key.references_columns.join(", ")
    )
}

/// PostgreSQL alters type and nullability as separate actions; emit only the
/// actions that actually change.
fn alter_column_sql(table: &str, from: &ColumnDef, to: &ColumnDef) -> String {
    let mut actions = Vec::new();
    if from.column_type != to.column_type {
        actions.push(format!(
            "ALTER COLUMN {} TYPE {}",
            to.name,
            to.column_type.sql()
        ));
    }
    if from.nullable != to.nullable {
        if to.nullable {
            actions.push(format!("ALTER COLUMN {} DROP NOT NULL", to.name));
        } else {
            actions.push(format!("ALTER COLUMN {} SET NOT NULL", to.name));
        }
    }
    format!("ALTER TABLE {} {}", table, actions.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn email_column() -> ColumnDef {
        ColumnDef {
            name: "email".to_string(),
            column_type: ColumnType::Text,
            nullable: true,
            is_key: false,
        }
    }

    #[test]
    fn test_add_column_round_trip() {
        let op = MigrationOperation::AddColumn {
            table: "authors".to_string(),
            column: email_column(),
        };
        assert_eq!(op.forward_sql(), "ALTER TABLE authors ADD COLUMN email TEXT");
        assert_eq!(op.reverse_sql(), "ALTER TABLE authors DROP COLUMN email");
    }

    #[test]
    fn test_drop_carries_enough_to_recreate() {
        let op = MigrationOperation::DropColumn {
            table: "authors".to_string(),
            column: email_column(),
        };
        assert_eq!(op.reverse_sql(), "ALTER TABLE authors ADD COLUMN email TEXT");
    }

    #[test]
    fn test_alter_column_emits_only_changed_actions() {
        let from = ColumnDef {
            name: "age".to_string(),
            column_type: ColumnType::Integer,
            nullable: true,
            is_key: false,
        };
        let to = ColumnDef {
            column_type: ColumnType::BigInt,
            ..from.clone()
        };
        let op = MigrationOperation::AlterColumn {
            table: "authors".to_string(),
            from: from.clone(),
            to,
        };
        assert_eq!(
            op.forward_sql(),
            "ALTER TABLE authors ALTER COLUMN age TYPE BIGINT"
        );
        assert_eq!(
            op.reverse_sql(),
            "ALTER TABLE authors ALTER COLUMN age TYPE INTEGER"
        );
    }

    #[test]
    fn test_create_table_lists_primary_key() {
        let table = TableSnapshot {
            name: "authors".to_string(),
            columns: vec![ColumnDef {
                name: "id".to_string(),
                column_type: ColumnType::Uuid,
                nullable: false,
                is_key: true,
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        };
        let sql = MigrationOperation::AddTable { table }.forward_sql();
        assert!(sql.contains("CREATE TABLE authors"));
        assert!(sql.contains("id UUID NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (id)"));
    }
}
