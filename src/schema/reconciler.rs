//! Schema Reconciler
//!
//! Brings a replica's structure in line with the master's.

use super::diff::diff;
use super::model::Schema;
use super::change::SchemaChange;
use crate::error::Result;
use crate::executor::Database;

/// What reconciliation did to one replica
#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    /// Changes applied, in application order
    pub applied: Vec<SchemaChange>,
    /// Whether nothing was left to change afterwards
    pub converged: bool,
}

/// Load the master schema and reconcile the replica against it
pub async fn reconcile(master: &dyn Database, replica: &dyn Database) -> Result<ReconcileSummary> {
    let master_schema = master.load_schema().await?;
    reconcile_with(&master_schema, replica).await
}

/// Reconcile the replica against an already loaded master schema.
///
/// All changes go to the replica as one batch; on failure the replica is
/// left as the backend's rollback leaves it and the error is returned.
pub async fn reconcile_with(master: &Schema, replica: &dyn Database) -> Result<ReconcileSummary> {
    let current = replica.load_schema().await?;
    let target_fingerprint = master.fingerprint();
    let current_fingerprint = current.fingerprint();

    tracing::info!(
        replica = replica.name(),
        master = %target_fingerprint,
        current = %current_fingerprint,
        "Comparing schemas"
    );

    let changes = diff(&current, master);
    if changes.is_empty() {
        return Ok(ReconcileSummary {
            applied: changes,
            converged: true,
        });
    }

    for change in &changes {
        tracing::info!(
            replica = replica.name(),
            table = change.table_name(),
            "Schema change: {}",
            change.kind()
        );
        tracing::debug!(replica = replica.name(), "{}", change.to_sql());
    }

    replica.apply_schema_changes(&changes).await?;

    let after = replica.load_schema().await?;
    let remaining = diff(&after, master);
    let converged = remaining.is_empty();
    if !converged {
        tracing::warn!(
            replica = replica.name(),
            expected = %target_fingerprint,
            actual = %after.fingerprint(),
            remaining = remaining.len(),
            "Replica schema still differs from master after reconciliation"
        );
    }

    Ok(ReconcileSummary {
        applied: changes,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryDatabase;
    use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema, TableSchema};
    use crate::value::Value;

    fn users(columns: &[&str]) -> TableSchema {
        let mut table = TableSchema::new("users");
        table.columns = columns
            .iter()
            .map(|name| ColumnSchema::new(*name, "varchar(64)"))
            .collect();
        table.columns[0] = ColumnSchema::new(columns[0], "int(11)").not_null();
        table.indexes = vec![IndexSchema::primary(vec![columns[0].to_string()])];
        table
    }

    fn orders() -> TableSchema {
        let mut table = TableSchema::new("orders");
        table.columns = vec![
            ColumnSchema::new("id", "int(11)").not_null(),
            ColumnSchema::new("user_id", "int(11)"),
        ];
        table.indexes = vec![
            IndexSchema::primary(vec!["id".into()]),
            IndexSchema::new("idx_user", vec!["user_id".into()], false),
        ];
        table.foreign_keys = vec![ForeignKeySchema {
            name: "fk_orders_user".into(),
            columns: vec!["user_id".into()],
            referenced_table: "users".into(),
            referenced_columns: vec!["id".into()],
            on_delete: "CASCADE".into(),
            on_update: "RESTRICT".into(),
        }];
        table
    }

    #[tokio::test]
    async fn test_replica_converges() {
        let master = MemoryDatabase::new("master")
            .with_table(users(&["id", "name", "email"]), vec![])
            .with_table(orders(), vec![]);
        let replica = MemoryDatabase::new("staging")
            .with_table(
                users(&["id", "email", "nick"]),
                vec![vec![
                    Value::Int(1),
                    Value::String("a@example.com".into()),
                    Value::String("al".into()),
                ]],
            )
            .with_table(TableSchema::new("legacy"), vec![]);

        let summary = reconcile(&master, &replica).await.unwrap();

        assert!(summary.converged);
        assert!(!summary.applied.is_empty());
        assert_eq!(
            replica.load_schema().await.unwrap().fingerprint(),
            master.load_schema().await.unwrap().fingerprint()
        );

        // Existing data follows its column
        let rows = replica.rows("users");
        assert_eq!(rows[0].get("email"), Some(&Value::String("a@example.com".into())));
        assert_eq!(rows[0].get("name"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_in_sync_replica_is_untouched() {
        let master = MemoryDatabase::new("master").with_table(orders(), vec![]);
        let replica = MemoryDatabase::new("staging").with_table(orders(), vec![]);

        let summary = reconcile(&master, &replica).await.unwrap();
        assert!(summary.applied.is_empty());
        assert!(summary.converged);
        assert_eq!(replica.stats().schema_batches, 0);
    }

    #[tokio::test]
    async fn test_default_differing_only_in_case_is_applied() {
        let mut target = users(&["id", "status"]);
        target.columns[1] = ColumnSchema::new("status", "varchar(64)").with_default("Active");
        let mut stale = users(&["id", "status"]);
        stale.columns[1] = ColumnSchema::new("status", "varchar(64)").with_default("active");

        let master = MemoryDatabase::new("master").with_table(target, vec![]);
        let replica = MemoryDatabase::new("staging").with_table(stale, vec![]);

        let summary = reconcile(&master, &replica).await.unwrap();

        assert_eq!(summary.applied.len(), 1);
        assert!(summary.converged);
        assert_eq!(
            replica.load_schema().await.unwrap(),
            master.load_schema().await.unwrap()
        );
    }

    #[test]
    fn test_fingerprint_tells_defaults_apart() {
        let mut a = users(&["id", "status"]);
        a.columns[1] = ColumnSchema::new("status", "varchar(64)").with_default("Active");
        let mut b = a.clone();
        b.columns[1] = ColumnSchema::new("status", "varchar(64)").with_default("active");
        assert_ne!(Schema::new(vec![a]).fingerprint(), Schema::new(vec![b]).fingerprint());
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let master = MemoryDatabase::new("master")
            .with_table(users(&["id", "name", "email"]), vec![])
            .with_table(orders(), vec![]);
        let replica = MemoryDatabase::new("staging").with_table(users(&["id", "name"]), vec![]);
        replica.fail_schema_changes_after(1);

        let before = replica.load_schema().await.unwrap();
        assert!(reconcile(&master, &replica).await.is_err());
        assert_eq!(replica.load_schema().await.unwrap(), before);
    }
}
