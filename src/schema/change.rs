//! Structural Changes
//!
//! One variant per DDL operation the reconciler can apply to a replica.

use super::model::{column_list, ColumnSchema, ForeignKeySchema, IndexSchema, TableSchema};
use crate::value::quote_ident;

/// Where an added or moved column is placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPosition {
    First,
    After(String),
}

impl ColumnPosition {
    fn to_sql(&self) -> String {
        match self {
            ColumnPosition::First => "FIRST".to_string(),
            ColumnPosition::After(col) => format!("AFTER {}", quote_ident(col)),
        }
    }
}

/// A single structural change to apply to a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    DropForeignKey {
        table: String,
        name: String,
    },
    DropIndex {
        table: String,
        index: IndexSchema,
    },
    DropTable {
        table: String,
    },
    /// Create a table with its columns and all of its indexes
    CreateTable {
        table: TableSchema,
    },
    AddColumn {
        table: String,
        column: ColumnSchema,
        position: ColumnPosition,
    },
    /// Change a column definition, optionally moving it
    ModifyColumn {
        table: String,
        column: ColumnSchema,
        position: Option<ColumnPosition>,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AddIndex {
        table: String,
        index: IndexSchema,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeySchema,
    },
}

impl SchemaChange {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            SchemaChange::CreateTable { table } => &table.name,
            SchemaChange::DropForeignKey { table, .. }
            | SchemaChange::DropIndex { table, .. }
            | SchemaChange::DropTable { table }
            | SchemaChange::AddColumn { table, .. }
            | SchemaChange::ModifyColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::AddIndex { table, .. }
            | SchemaChange::AddForeignKey { table, .. } => table,
        }
    }

    /// Short description for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaChange::DropForeignKey { .. } => "drop foreign key",
            SchemaChange::DropIndex { .. } => "drop index",
            SchemaChange::DropTable { .. } => "drop table",
            SchemaChange::CreateTable { .. } => "create table",
            SchemaChange::AddColumn { .. } => "add column",
            SchemaChange::ModifyColumn { .. } => "modify column",
            SchemaChange::DropColumn { .. } => "drop column",
            SchemaChange::AddIndex { .. } => "add index",
            SchemaChange::AddForeignKey { .. } => "add foreign key",
        }
    }

    /// Convert to a MySQL DDL statement
    pub fn to_sql(&self) -> String {
        match self {
            SchemaChange::DropForeignKey { table, name } => format!(
                "ALTER TABLE {} DROP FOREIGN KEY {}",
                quote_ident(table),
                quote_ident(name)
            ),

            SchemaChange::DropIndex { table, index } => {
                if index.is_primary() {
                    format!("ALTER TABLE {} DROP PRIMARY KEY", quote_ident(table))
                } else {
                    format!(
                        "ALTER TABLE {} DROP INDEX {}",
                        quote_ident(table),
                        quote_ident(&index.name)
                    )
                }
            }

            SchemaChange::DropTable { table } => format!("DROP TABLE {}", quote_ident(table)),

            SchemaChange::CreateTable { table } => {
                let mut defs: Vec<String> =
                    table.columns.iter().map(ColumnSchema::definition).collect();
                // Primary key first, then the rest in declared order
                defs.extend(
                    table
                        .indexes
                        .iter()
                        .filter(|i| i.is_primary())
                        .chain(table.indexes.iter().filter(|i| !i.is_primary()))
                        .map(IndexSchema::definition),
                );
                format!(
                    "CREATE TABLE {} (\n  {}\n)",
                    quote_ident(&table.name),
                    defs.join(",\n  ")
                )
            }

            SchemaChange::AddColumn {
                table,
                column,
                position,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                column.definition(),
                position.to_sql()
            ),

            SchemaChange::ModifyColumn {
                table,
                column,
                position,
            } => {
                let mut sql = format!(
                    "ALTER TABLE {} MODIFY COLUMN {}",
                    quote_ident(table),
                    column.definition()
                );
                if let Some(position) = position {
                    sql.push(' ');
                    sql.push_str(&position.to_sql());
                }
                sql
            }

            SchemaChange::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            ),

            SchemaChange::AddIndex { table, index } => {
                if index.is_primary() {
                    format!(
                        "ALTER TABLE {} ADD PRIMARY KEY ({})",
                        quote_ident(table),
                        column_list(&index.columns)
                    )
                } else {
                    format!(
                        "ALTER TABLE {} ADD {}",
                        quote_ident(table),
                        index.definition()
                    )
                }
            }

            SchemaChange::AddForeignKey { table, foreign_key } => format!(
                "ALTER TABLE {} ADD {}",
                quote_ident(table),
                foreign_key.definition()
            ),
        }
    }
}

impl std::fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let mut table = TableSchema::new("order");
        table.columns = vec![
            ColumnSchema::new("id", "int(11)").not_null(),
            ColumnSchema::new("key", "varchar(32)"),
        ];
        table.indexes = vec![
            IndexSchema::new("uniq_key", vec!["key".into()], true),
            IndexSchema::primary(vec!["id".into()]),
        ];

        let sql = SchemaChange::CreateTable { table }.to_sql();
        assert_eq!(
            sql,
            "CREATE TABLE `order` (\n  `id` int(11) NOT NULL,\n  `key` varchar(32) NULL,\n  PRIMARY KEY (`id`),\n  UNIQUE KEY `uniq_key` (`key`)\n)"
        );
    }

    #[test]
    fn test_alter_sql() {
        let add = SchemaChange::AddColumn {
            table: "users".into(),
            column: ColumnSchema::new("email", "varchar(255)"),
            position: ColumnPosition::After("name".into()),
        };
        assert_eq!(
            add.to_sql(),
            "ALTER TABLE `users` ADD COLUMN `email` varchar(255) NULL AFTER `name`"
        );

        let modify = SchemaChange::ModifyColumn {
            table: "users".into(),
            column: ColumnSchema::new("id", "bigint(20)").not_null(),
            position: Some(ColumnPosition::First),
        };
        assert_eq!(
            modify.to_sql(),
            "ALTER TABLE `users` MODIFY COLUMN `id` bigint(20) NOT NULL FIRST"
        );

        let drop_pk = SchemaChange::DropIndex {
            table: "users".into(),
            index: IndexSchema::primary(vec!["id".into()]),
        };
        assert_eq!(drop_pk.to_sql(), "ALTER TABLE `users` DROP PRIMARY KEY");
        assert_eq!(drop_pk.table_name(), "users");
    }

    #[test]
    fn test_foreign_key_sql() {
        let fk = ForeignKeySchema {
            name: "fk_orders_user".into(),
            columns: vec!["user_id".into()],
            referenced_table: "users".into(),
            referenced_columns: vec!["id".into()],
            on_delete: "CASCADE".into(),
            on_update: "RESTRICT".into(),
        };
        let change = SchemaChange::AddForeignKey {
            table: "orders".into(),
            foreign_key: fk,
        };
        assert_eq!(
            change.to_sql(),
            "ALTER TABLE `orders` ADD CONSTRAINT `fk_orders_user` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`) ON DELETE CASCADE ON UPDATE RESTRICT"
        );
    }
}
