//! Run Orchestrator
//!
//! Sequences a mirror run: for each replica in declaration order, an
//! optional dump, schema reconciliation, then every master table in the
//! master's enumeration order. A replica failure ends that replica only.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::backup::BackupTool;
use crate::console::{colorize, Color};
use crate::error::{Error, Result};
use crate::executor::Database;
use crate::registry::{ConnectionTarget, ReplicaConnection};
use crate::schema::{reconcile_with, Schema};
use crate::sync::{ClearPolicy, ExceptionRules, SyncStats, TableSynchronizer};

/// Progress of a run, in the order it happens
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ReplicaStarted {
        replica: String,
    },
    BackupCreated {
        replica: String,
        path: PathBuf,
    },
    SchemaReconciled {
        replica: String,
        changes: usize,
    },
    TableSynced {
        replica: String,
        position: usize,
        total: usize,
        stats: SyncStats,
    },
    ReplicaSynced {
        replica: String,
        tables: usize,
        duration: Duration,
    },
    ReplicaFailed {
        replica: String,
        kind: &'static str,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        synced: usize,
        failed: usize,
        duration: Duration,
    },
}

impl SyncEvent {
    /// Human-readable progress line
    pub fn message(&self) -> String {
        match self {
            SyncEvent::ReplicaStarted { replica } => format!("Syncing replica {}", replica),
            SyncEvent::BackupCreated { replica, path } => {
                format!("Dump of {} written to {}", replica, path.display())
            }
            SyncEvent::SchemaReconciled { replica, changes } => match changes {
                0 => format!("Schema of {} already matches master", replica),
                n => format!("Schema of {} reconciled ({} changes)", replica, n),
            },
            SyncEvent::TableSynced {
                replica,
                position,
                total,
                stats,
            } => format!(
                "[{}/{}] {}.{}: {} inserted, {} updated, {} skipped in {:.2}s",
                position,
                total,
                replica,
                stats.table,
                stats.inserted,
                stats.updated,
                stats.skipped,
                stats.duration.as_secs_f64()
            ),
            SyncEvent::ReplicaSynced {
                replica,
                tables,
                duration,
            } => format!(
                "Replica {} synced: {} tables in {:.2}s",
                replica,
                tables,
                duration.as_secs_f64()
            ),
            SyncEvent::ReplicaFailed {
                replica,
                kind,
                error,
            } => format!("Replica {} failed ({} error): {}", replica, kind, error),
            SyncEvent::RunCompleted {
                synced,
                failed,
                duration,
                ..
            } => format!(
                "Run completed: {} replicas synced, {} failed in {:.2}s",
                synced,
                failed,
                duration.as_secs_f64()
            ),
        }
    }

    fn color(&self) -> Color {
        match self {
            SyncEvent::ReplicaFailed { .. } => Color::Red,
            SyncEvent::RunCompleted { failed, .. } if *failed > 0 => Color::Yellow,
            SyncEvent::ReplicaSynced { .. } | SyncEvent::RunCompleted { .. } => Color::Green,
            SyncEvent::TableSynced { .. } => Color::Cyan,
            _ => Color::Yellow,
        }
    }
}

/// Receives progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}

/// Prints progress to stdout and optionally mirrors it into info.log
#[derive(Debug, Clone, Copy)]
pub struct ConsoleProgress {
    console_output: bool,
    advanced_log: bool,
}

impl ConsoleProgress {
    pub fn new(console_output: bool, advanced_log: bool) -> Self {
        Self {
            console_output,
            advanced_log,
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: &SyncEvent) {
        let message = event.message();

        if self.console_output {
            println!("{}", colorize(&message, event.color()));
        }

        match event {
            SyncEvent::ReplicaFailed { .. } => tracing::error!("{}", message),
            _ if self.advanced_log => tracing::info!("{}", message),
            _ => {}
        }
    }
}

/// Outcome for one replica
#[derive(Debug)]
pub struct ReplicaOutcome {
    pub replica: String,
    /// Per-table stats on success, the error that stopped the replica otherwise
    pub result: Result<Vec<SyncStats>>,
}

impl ReplicaOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of a whole run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcomes: Vec<ReplicaOutcome>,
    pub duration: Duration,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub fn synced(&self) -> usize {
        self.outcomes.len() - self.failed()
    }

    /// 0 when every replica synced, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.failed() == 0 {
            0
        } else {
            1
        }
    }
}

/// Run-wide settings
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub chunk_size: u64,
    pub clear_policy: ClearPolicy,
}

pub struct RunOrchestrator<'a> {
    settings: RunSettings,
    rules: &'a ExceptionRules,
    progress: &'a dyn ProgressSink,
    backup: Option<&'a dyn BackupTool>,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(settings: RunSettings, rules: &'a ExceptionRules, progress: &'a dyn ProgressSink) -> Self {
        Self {
            settings,
            rules,
            progress,
            backup: None,
        }
    }

    /// Dump every replica before it is touched
    pub fn with_backup(mut self, backup: &'a dyn BackupTool) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Mirror the master onto every replica.
    ///
    /// Only a failure to read the master's schema is returned as an error;
    /// replica failures are recorded in the report. Each replica connection
    /// is closed once its sync ends.
    pub async fn run(&self, master: &dyn Database, replicas: Vec<ReplicaConnection>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        self.run_inner(run_id, master, replicas).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        master: &dyn Database,
        replicas: Vec<ReplicaConnection>,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let master_schema = master.load_schema().await?;
        tracing::info!(
            tables = master_schema.tables.len(),
            replicas = replicas.len(),
            chunk_size = self.settings.chunk_size,
            "Starting run"
        );

        let mut outcomes = Vec::with_capacity(replicas.len());
        for ReplicaConnection { target, database } in replicas {
            self.progress.emit(&SyncEvent::ReplicaStarted {
                replica: target.name.clone(),
            });

            let result = match database {
                Ok(replica) => {
                    let result = self
                        .sync_replica(&target, &master_schema, master, replica.as_ref())
                        .await;
                    replica.close().await;
                    result
                }
                Err(e) => Err(e),
            };

            if let Err(e) = &result {
                self.progress.emit(&SyncEvent::ReplicaFailed {
                    replica: target.name.clone(),
                    kind: e.kind(),
                    error: e.to_string(),
                });
            }

            outcomes.push(ReplicaOutcome {
                replica: target.name,
                result,
            });
        }

        let report = RunReport {
            run_id,
            outcomes,
            duration: started.elapsed(),
        };
        self.progress.emit(&SyncEvent::RunCompleted {
            run_id,
            synced: report.synced(),
            failed: report.failed(),
            duration: report.duration,
        });

        Ok(report)
    }

    async fn sync_replica(
        &self,
        target: &ConnectionTarget,
        master_schema: &Schema,
        master: &dyn Database,
        replica: &dyn Database,
    ) -> Result<Vec<SyncStats>> {
        let started = Instant::now();
        let name = target.name.as_str();

        if let Some(backup) = self.backup {
            let path = backup.dump(target).await?;
            self.progress.emit(&SyncEvent::BackupCreated {
                replica: name.to_string(),
                path,
            });
        }

        let summary = reconcile_with(master_schema, replica)
            .await
            .map_err(|e| Error::SchemaReconciliation {
                replica: name.to_string(),
                source: Box::new(e),
            })?;
        self.progress.emit(&SyncEvent::SchemaReconciled {
            replica: name.to_string(),
            changes: summary.applied.len(),
        });

        let synchronizer =
            TableSynchronizer::new(self.rules, self.settings.chunk_size, self.settings.clear_policy);
        let total = master_schema.tables.len();
        let mut all_stats = Vec::with_capacity(total);

        for (i, table) in master_schema.tables.iter().enumerate() {
            let stats = synchronizer.sync_table(table, master, replica).await?;
            self.progress.emit(&SyncEvent::TableSynced {
                replica: name.to_string(),
                position: i + 1,
                total,
                stats: stats.clone(),
            });
            all_stats.push(stats);
        }

        self.progress.emit(&SyncEvent::ReplicaSynced {
            replica: name.to_string(),
            tables: total,
            duration: started.elapsed(),
        });

        Ok(all_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::schema::{ColumnSchema, IndexSchema, TableSchema};
    use crate::executor::MemoryDatabase;
    use crate::value::Value;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SyncEvent>>,
    }

    impl Recorder {
        fn messages(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(SyncEvent::message).collect()
        }
    }

    impl ProgressSink for Recorder {
        fn emit(&self, event: &SyncEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct FailingBackup;

    #[async_trait]
    impl BackupTool for FailingBackup {
        async fn dump(&self, target: &ConnectionTarget) -> Result<PathBuf> {
            Err(Error::Backup {
                database: target.config.dbname.clone(),
                reason: "exit status 2".into(),
            })
        }
    }

    fn users_table() -> TableSchema {
        let mut table = TableSchema::new("users");
        table.columns = vec![
            ColumnSchema::new("id", "int(11)").not_null(),
            ColumnSchema::new("name", "varchar(64)"),
            ColumnSchema::new("email", "varchar(255)"),
        ];
        table.indexes = vec![IndexSchema::primary(vec!["id".into()])];
        table
    }

    fn orders_table() -> TableSchema {
        let mut table = TableSchema::new("orders");
        table.columns = vec![
            ColumnSchema::new("id", "int(11)").not_null(),
            ColumnSchema::new("status", "varchar(16)"),
        ];
        table.indexes = vec![IndexSchema::primary(vec!["id".into()])];
        table
    }

    fn user(id: i64) -> Vec<Value> {
        vec![
            Value::Int(id),
            Value::String(format!("user {}", id)),
            Value::String(format!("user{}@example.com", id)),
        ]
    }

    fn order(id: i64, status: &str) -> Vec<Value> {
        vec![Value::Int(id), Value::String(status.into())]
    }

    fn master() -> MemoryDatabase {
        MemoryDatabase::new("master")
            .with_table(users_table(), (1..=350).map(user).collect())
            .with_table(
                orders_table(),
                vec![order(1, "paid"), order(2, "reserved"), order(3, "shipped")],
            )
    }

    fn connection(db: MemoryDatabase) -> ReplicaConnection {
        let name = db.name().to_string();
        ReplicaConnection {
            target: target(&name),
            database: Ok(Box::new(db)),
        }
    }

    fn target(name: &str) -> ConnectionTarget {
        ConnectionTarget::new(
            name,
            DatabaseConfig {
                host: "localhost".into(),
                dbname: format!("shop_{}", name),
                ..Default::default()
            },
        )
    }

    fn reserved_rules() -> ExceptionRules {
        let config: toml::Table = toml::from_str("[orders]\nstatus = [\"reserved\"]").unwrap();
        ExceptionRules::from_config(&config).unwrap()
    }

    fn settings() -> RunSettings {
        RunSettings {
            chunk_size: 200,
            clear_policy: ClearPolicy::AllRules,
        }
    }

    fn stats_for<'r>(report: &'r RunReport, replica: &str, table: &str) -> &'r SyncStats {
        report
            .outcomes
            .iter()
            .find(|o| o.replica == replica)
            .and_then(|o| o.result.as_ref().ok())
            .and_then(|stats| stats.iter().find(|s| s.table == table))
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_replica_is_built_from_master() {
        let master = master();
        let rules = reserved_rules();
        let recorder = Recorder::default();
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder);

        let replica = MemoryDatabase::new("replica1");
        let report = orchestrator
            .run(&master, vec![connection(replica)])
            .await
            .unwrap();

        assert_eq!(report.exit_code(), 0);
        let users = stats_for(&report, "replica1", "users");
        assert_eq!((users.inserted, users.updated, users.skipped), (350, 0, 0));
        assert_eq!(users.fetches, 2);

        // The reserved master order is never copied
        let orders = stats_for(&report, "replica1", "orders");
        assert_eq!((orders.inserted, orders.skipped), (2, 1));

        // Tables in master enumeration order (by name)
        let messages = recorder.messages();
        assert!(messages.iter().any(|m| m.starts_with("[1/2] replica1.orders")));
        assert!(messages.iter().any(|m| m.starts_with("[2/2] replica1.users")));
        assert!(messages.last().unwrap().starts_with("Run completed: 1 replicas synced, 0 failed"));
    }

    #[tokio::test]
    async fn test_stale_rows_are_replaced_and_reserved_rows_kept() {
        let master = master();
        let rules = reserved_rules();
        let recorder = Recorder::default();
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder);

        let stale_users: Vec<_> = (1001..=1010).map(user).collect();
        let reserved: Vec<_> = (500..505).map(|id| order(id, "reserved")).collect();
        let replica = std::sync::Arc::new(
            MemoryDatabase::new("replica1")
                .with_table(users_table(), stale_users)
                .with_table(orders_table(), reserved.clone()),
        );

        let report = orchestrator
            .run(&master, vec![shared(&replica)])
            .await
            .unwrap();
        assert_eq!(report.exit_code(), 0);

        let users = stats_for(&report, "replica1", "users");
        assert_eq!((users.inserted, users.updated, users.skipped), (350, 0, 0));
        let user_ids: Vec<_> = replica.rows("users").iter().map(|r| r.values[0].clone()).collect();
        assert_eq!(user_ids, (1..=350).map(Value::Int).collect::<Vec<_>>());

        // The five reserved rows survive untouched and stay the only reserved ones
        let orders: Vec<_> = replica.rows("orders").into_iter().map(|r| r.values).collect();
        assert_eq!(orders.len(), 7);
        assert_eq!(&orders[..5], &reserved[..]);
        let reserved_count = orders
            .iter()
            .filter(|values| values[1] == Value::String("reserved".into()))
            .count();
        assert_eq!(reserved_count, 5);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let master = master();
        let rules = reserved_rules();
        let recorder = Recorder::default();
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder);

        let replica = std::sync::Arc::new(MemoryDatabase::new("replica1"));
        orchestrator
            .run(&master, vec![shared(&replica)])
            .await
            .unwrap();
        let users_after_first = replica.rows("users");
        let orders_after_first = replica.rows("orders");

        orchestrator
            .run(&master, vec![shared(&replica)])
            .await
            .unwrap();

        // One schema batch in total: the second reconciliation finds nothing to do
        assert_eq!(replica.stats().schema_batches, 1);
        assert!(recorder
            .messages()
            .iter()
            .any(|m| m == "Schema of replica1 already matches master"));
        assert_eq!(replica.rows("users"), users_after_first);
        assert_eq!(replica.rows("orders"), orders_after_first);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_replica() {
        let master = master();
        let rules = reserved_rules();
        let recorder = Recorder::default();
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder);

        let broken_schema = MemoryDatabase::new("broken").with_table(users_table(), vec![]);
        broken_schema.fail_schema_changes_after(0);
        let broken_data = MemoryDatabase::new("readonly");
        broken_data.fail_writes_to("orders");
        let unreachable = ReplicaConnection {
            target: target("offline"),
            database: Err(Error::QueryExecution("Can't connect".into())),
        };
        let healthy = MemoryDatabase::new("healthy");

        let report = orchestrator
            .run(
                &master,
                vec![
                    connection(broken_schema),
                    connection(broken_data),
                    unreachable,
                    connection(healthy),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.failed(), 3);
        assert_eq!(report.synced(), 1);
        assert_eq!(report.exit_code(), 1);

        let kinds: Vec<_> = report
            .outcomes
            .iter()
            .map(|o| o.result.as_ref().err().map(Error::kind))
            .collect();
        assert_eq!(kinds, vec![Some("schema"), Some("data"), Some("database"), None]);

        // The data failure stops the replica at its first table
        let messages = recorder.messages();
        assert!(!messages.iter().any(|m| m.contains("readonly.users")));
        assert_eq!(stats_for(&report, "healthy", "users").inserted, 350);
    }

    #[tokio::test]
    async fn test_backup_failure_stops_replica_before_changes() {
        let master = master();
        let rules = reserved_rules();
        let recorder = Recorder::default();
        let backup = FailingBackup;
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder).with_backup(&backup);

        let replica = std::sync::Arc::new(
            MemoryDatabase::new("replica1").with_table(orders_table(), vec![order(9, "paid")]),
        );
        let report = orchestrator
            .run(&master, vec![shared(&replica)])
            .await
            .unwrap();

        assert_eq!(report.exit_code(), 1);
        assert!(matches!(
            report.outcomes[0].result,
            Err(Error::Backup { .. })
        ));
        assert_eq!(replica.stats().schema_batches, 0);
        assert_eq!(replica.rows("orders").len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_master_aborts_run() {
        let master = master();
        master.fail_schema_load();
        let rules = ExceptionRules::default();
        let recorder = Recorder::default();
        let orchestrator = RunOrchestrator::new(settings(), &rules, &recorder);

        let result = orchestrator
            .run(&master, vec![connection(MemoryDatabase::new("replica1"))])
            .await;
        assert!(result.is_err());
        assert!(recorder.messages().is_empty());
    }

    /// Replica handle that leaves the database alive after the run closes it
    struct Shared(std::sync::Arc<MemoryDatabase>);

    fn shared(db: &std::sync::Arc<MemoryDatabase>) -> ReplicaConnection {
        ReplicaConnection {
            target: target(db.name()),
            database: Ok(Box::new(Shared(db.clone()))),
        }
    }

    #[async_trait]
    impl Database for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }
        async fn load_schema(&self) -> Result<Schema> {
            self.0.load_schema().await
        }
        async fn apply_schema_changes(&self, changes: &[crate::schema::SchemaChange]) -> Result<()> {
            self.0.apply_schema_changes(changes).await
        }
        async fn count_rows(&self, table: &str) -> Result<u64> {
            self.0.count_rows(table).await
        }
        async fn fetch_chunk(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<crate::value::Row>> {
            self.0.fetch_chunk(table, limit, offset).await
        }
        async fn find_by_identity(
            &self,
            table: &str,
            column: &str,
            value: &Value,
        ) -> Result<Option<crate::value::Row>> {
            self.0.find_by_identity(table, column, value).await
        }
        async fn insert_row(&self, table: &str, row: &crate::value::Row) -> Result<()> {
            self.0.insert_row(table, row).await
        }
        async fn update_by_identity(&self, table: &str, column: &str, row: &crate::value::Row) -> Result<u64> {
            self.0.update_by_identity(table, column, row).await
        }
        async fn clear_table(&self, statement: &crate::sync::ClearStatement) -> Result<()> {
            self.0.clear_table(statement).await
        }
        async fn close(&self) {}
    }
}
