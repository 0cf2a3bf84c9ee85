//! Schema Diff
//!
//! Computes the ordered list of changes that turns one schema into another.
//! The order is dependency-safe: constraints and indexes go before the
//! columns and tables they reference, and come back only after every column
//! exists.

use super::change::{ColumnPosition, SchemaChange};
use super::model::{Schema, TableSchema};

/// Changes grouped by phase; flattened in declaration order
#[derive(Default)]
struct Plan {
    drop_foreign_keys: Vec<SchemaChange>,
    drop_indexes: Vec<SchemaChange>,
    drop_tables: Vec<SchemaChange>,
    create_tables: Vec<SchemaChange>,
    add_columns: Vec<SchemaChange>,
    modify_columns: Vec<SchemaChange>,
    drop_columns: Vec<SchemaChange>,
    add_indexes: Vec<SchemaChange>,
    add_foreign_keys: Vec<SchemaChange>,
}

impl Plan {
    fn into_changes(self) -> Vec<SchemaChange> {
        let mut changes = self.drop_foreign_keys;
        changes.extend(self.drop_indexes);
        changes.extend(self.drop_tables);
        changes.extend(self.create_tables);
        changes.extend(self.add_columns);
        changes.extend(self.modify_columns);
        changes.extend(self.drop_columns);
        changes.extend(self.add_indexes);
        changes.extend(self.add_foreign_keys);
        changes
    }
}

/// Changes that make `current` structurally equal to `target`.
///
/// Master always wins: anything in `current` that `target` lacks is dropped.
pub fn diff(current: &Schema, target: &Schema) -> Vec<SchemaChange> {
    let mut plan = Plan::default();

    for table in &current.tables {
        if target.table(&table.name).is_none() {
            plan.drop_tables.push(SchemaChange::DropTable {
                table: table.name.clone(),
            });
        }
    }

    for table in &target.tables {
        match current.table(&table.name) {
            None => {
                // Foreign keys may point at tables created later in the batch
                let mut created = table.clone();
                created.foreign_keys.clear();
                plan.create_tables
                    .push(SchemaChange::CreateTable { table: created });
                for fk in &table.foreign_keys {
                    plan.add_foreign_keys.push(SchemaChange::AddForeignKey {
                        table: table.name.clone(),
                        foreign_key: fk.clone(),
                    });
                }
            }
            Some(existing) => diff_table(existing, table, &mut plan),
        }
    }

    plan.into_changes()
}

fn diff_table(current: &TableSchema, target: &TableSchema, plan: &mut Plan) {
    let table = &target.name;

    // Foreign keys
    for fk in &current.foreign_keys {
        if target.foreign_key(&fk.name) != Some(fk) {
            plan.drop_foreign_keys.push(SchemaChange::DropForeignKey {
                table: table.clone(),
                name: fk.name.clone(),
            });
        }
    }
    for fk in &target.foreign_keys {
        if current.foreign_key(&fk.name) != Some(fk) {
            plan.add_foreign_keys.push(SchemaChange::AddForeignKey {
                table: table.clone(),
                foreign_key: fk.clone(),
            });
        }
    }

    // Indexes (a changed index is dropped and re-added)
    for index in &current.indexes {
        if target.index(&index.name) != Some(index) {
            plan.drop_indexes.push(SchemaChange::DropIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }
    for index in &target.indexes {
        if current.index(&index.name) != Some(index) {
            plan.add_indexes.push(SchemaChange::AddIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }

    // Columns
    for column in &current.columns {
        if target.column(&column.name).is_none() {
            plan.drop_columns.push(SchemaChange::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    let position_of = |i: usize| -> ColumnPosition {
        if i == 0 {
            ColumnPosition::First
        } else {
            ColumnPosition::After(target.columns[i - 1].name.clone())
        }
    };

    // Order the replica will have once additions are placed and drops are gone
    let mut simulated: Vec<&str> = current
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| target.column(name).is_some())
        .collect();

    for (i, column) in target.columns.iter().enumerate() {
        if current.column(&column.name).is_some() {
            continue;
        }
        plan.add_columns.push(SchemaChange::AddColumn {
            table: table.clone(),
            column: column.clone(),
            position: position_of(i),
        });
        let at = if i == 0 {
            0
        } else {
            let previous = target.columns[i - 1].name.as_str();
            simulated
                .iter()
                .position(|name| *name == previous)
                .map(|p| p + 1)
                .unwrap_or(simulated.len())
        };
        simulated.insert(at, column.name.as_str());
    }

    // From the first out-of-place column on, every column is moved after its
    // master predecessor, which rebuilds the master order one column at a time
    let first_misplaced = target
        .columns
        .iter()
        .zip(simulated.iter())
        .position(|(column, name)| column.name != *name);

    for (i, column) in target.columns.iter().enumerate() {
        let reposition = first_misplaced.map_or(false, |k| i >= k);
        let redefine = current
            .column(&column.name)
            .map_or(false, |existing| !existing.same_definition(column));

        if reposition || redefine {
            plan.modify_columns.push(SchemaChange::ModifyColumn {
                table: table.clone(),
                column: column.clone(),
                position: reposition.then(|| position_of(i)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{ColumnSchema, ForeignKeySchema, IndexSchema};

    fn table(name: &str, columns: &[(&str, &str)]) -> TableSchema {
        let mut t = TableSchema::new(name);
        t.columns = columns
            .iter()
            .map(|(n, ty)| ColumnSchema::new(*n, *ty))
            .collect();
        t.indexes = vec![IndexSchema::primary(vec![columns[0].0.to_string()])];
        t
    }

    fn users() -> TableSchema {
        table(
            "users",
            &[("id", "int(11)"), ("name", "varchar(64)"), ("email", "varchar(255)")],
        )
    }

    #[test]
    fn test_identical_schemas_have_no_diff() {
        let schema = Schema::new(vec![users()]);
        assert!(diff(&schema, &schema.clone()).is_empty());
    }

    #[test]
    fn test_missing_and_extra_tables() {
        let master = Schema::new(vec![users()]);
        let replica = Schema::new(vec![table("legacy", &[("id", "int(11)")])]);

        let changes = diff(&replica, &master);
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], SchemaChange::DropTable { table } if table == "legacy"));
        assert!(matches!(&changes[1], SchemaChange::CreateTable { table } if table.name == "users"));
    }

    #[test]
    fn test_added_column_is_positioned() {
        let master = Schema::new(vec![users()]);
        let replica = Schema::new(vec![table("users", &[("id", "int(11)"), ("email", "varchar(255)")])]);

        let changes = diff(&replica, &master);
        assert_eq!(
            changes,
            vec![SchemaChange::AddColumn {
                table: "users".into(),
                column: ColumnSchema::new("name", "varchar(64)"),
                position: ColumnPosition::After("id".into()),
            }]
        );
    }

    #[test]
    fn test_changed_and_dropped_columns() {
        let master = Schema::new(vec![users()]);
        let replica = Schema::new(vec![table(
            "users",
            &[
                ("id", "int(11)"),
                ("name", "varchar(32)"),
                ("email", "varchar(255)"),
                ("legacy_flag", "tinyint(1)"),
            ],
        )]);

        let changes = diff(&replica, &master);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0],
            SchemaChange::ModifyColumn {
                table: "users".into(),
                column: ColumnSchema::new("name", "varchar(64)"),
                position: None,
            }
        );
        assert!(matches!(&changes[1], SchemaChange::DropColumn { column, .. } if column == "legacy_flag"));
    }

    #[test]
    fn test_reordered_columns_are_moved() {
        let master = Schema::new(vec![users()]);
        let replica = Schema::new(vec![table(
            "users",
            &[("id", "int(11)"), ("email", "varchar(255)"), ("name", "varchar(64)")],
        )]);

        let changes = diff(&replica, &master);
        let moves: Vec<_> = changes
            .iter()
            .map(|c| match c {
                SchemaChange::ModifyColumn { column, position, .. } => {
                    (column.name.clone(), position.clone())
                }
                other => panic!("unexpected change {:?}", other),
            })
            .collect();
        assert_eq!(
            moves,
            vec![
                ("name".to_string(), Some(ColumnPosition::After("id".into()))),
                ("email".to_string(), Some(ColumnPosition::After("name".into()))),
            ]
        );
    }

    #[test]
    fn test_dependency_order() {
        let mut master_users = users();
        master_users
            .indexes
            .push(IndexSchema::new("idx_email", vec!["email".into()], true));
        let mut orders = table("orders", &[("id", "int(11)"), ("user_id", "int(11)")]);
        orders.foreign_keys.push(ForeignKeySchema {
            name: "fk_orders_user".into(),
            columns: vec!["user_id".into()],
            referenced_table: "users".into(),
            referenced_columns: vec!["id".into()],
            on_delete: "CASCADE".into(),
            on_update: "RESTRICT".into(),
        });
        let master = Schema::new(vec![orders, master_users]);

        // Replica indexes a column master no longer has
        let mut replica_users = table(
            "users",
            &[("id", "int(11)"), ("name", "varchar(64)"), ("email", "varchar(255)"), ("nick", "varchar(16)")],
        );
        replica_users
            .indexes
            .push(IndexSchema::new("idx_nick", vec!["nick".into()], false));
        let replica = Schema::new(vec![replica_users]);

        let kinds: Vec<_> = diff(&replica, &master).iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "drop index",
                "create table",
                "drop column",
                "add index",
                "add foreign key",
            ]
        );
    }

    #[test]
    fn test_changed_index_is_recreated() {
        let master = Schema::new(vec![users()]);
        let mut replica_users = users();
        replica_users.indexes = vec![IndexSchema::primary(vec!["email".into()])];
        let replica = Schema::new(vec![replica_users]);

        let changes = diff(&replica, &master);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].to_sql(), "ALTER TABLE `users` DROP PRIMARY KEY");
        assert_eq!(changes[1].to_sql(), "ALTER TABLE `users` ADD PRIMARY KEY (`id`)");
    }
}
