//! Table Synchronizer
//!
//! Copies one table from the master into a replica: the replica table is
//! cleared (keeping protected rows), then master rows are pulled in chunks
//! and upserted by identity column.

use std::time::{Duration, Instant};

use super::exceptions::{ClearPolicy, ExceptionRules};
use crate::error::{Error, Result};
use crate::executor::Database;
use crate::schema::TableSchema;
use crate::value::{Row, Value};

/// Paging position over a master table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    offset: u64,
    chunk_size: u64,
}

impl SyncCursor {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Another fetch is due while the offset has not passed the row count
    pub fn has_more(&self, total: u64) -> bool {
        self.offset <= total
    }

    pub fn advance(&mut self) {
        self.offset += self.chunk_size;
    }
}

/// Outcome of one table sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub table: String,
    /// Master row count taken before the first fetch
    pub total_rows: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Rows left alone because the master or replica copy is protected
    pub skipped: u64,
    pub fetches: u64,
    pub duration: Duration,
}

enum RowAction {
    Inserted,
    Updated,
    Skipped,
}

/// Synchronizes tables under one set of exception rules
pub struct TableSynchronizer<'a> {
    rules: &'a ExceptionRules,
    chunk_size: u64,
    clear_policy: ClearPolicy,
}

impl<'a> TableSynchronizer<'a> {
    pub fn new(rules: &'a ExceptionRules, chunk_size: u64, clear_policy: ClearPolicy) -> Self {
        Self {
            rules,
            chunk_size,
            clear_policy,
        }
    }

    /// Mirror `table` from master into replica.
    ///
    /// Any failure is reported as [`Error::DataSync`] naming the table.
    pub async fn sync_table(
        &self,
        table: &TableSchema,
        master: &dyn Database,
        replica: &dyn Database,
    ) -> Result<SyncStats> {
        self.run(table, master, replica)
            .await
            .map_err(|e| Error::DataSync {
                table: table.name.clone(),
                source: Box::new(e),
            })
    }

    async fn run(
        &self,
        table: &TableSchema,
        master: &dyn Database,
        replica: &dyn Database,
    ) -> Result<SyncStats> {
        let started = Instant::now();
        let name = table.name.as_str();
        let identity = table
            .identity_column()
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::Schema(format!("table '{}' has no columns", name)))?;

        let clear = self.rules.clear_statement(name, self.clear_policy);
        tracing::debug!(table = name, "Clearing replica table: {}", clear.to_sql());
        replica.clear_table(&clear).await?;

        let total = master.count_rows(name).await?;
        let mut stats = SyncStats {
            table: name.to_string(),
            total_rows: total,
            ..Default::default()
        };

        let mut cursor = SyncCursor::new(self.chunk_size);
        while cursor.has_more(total) {
            let rows = master
                .fetch_chunk(name, cursor.chunk_size(), cursor.offset())
                .await?;
            stats.fetches += 1;

            for row in &rows {
                match self.apply_row(name, &identity, row, replica).await? {
                    RowAction::Inserted => stats.inserted += 1,
                    RowAction::Updated => stats.updated += 1,
                    RowAction::Skipped => stats.skipped += 1,
                }
            }

            tracing::debug!(
                table = name,
                offset = cursor.offset(),
                rows = rows.len(),
                "Chunk applied"
            );
            cursor.advance();
        }

        stats.duration = started.elapsed();
        Ok(stats)
    }

    async fn apply_row(
        &self,
        table: &str,
        identity: &str,
        row: &Row,
        replica: &dyn Database,
    ) -> Result<RowAction> {
        if self.rules.is_protected(table, row) {
            return Ok(RowAction::Skipped);
        }

        let key = row.get(identity).cloned().unwrap_or(Value::Null);
        let existing = replica.find_by_identity(table, identity, &key).await?;

        match existing {
            Some(current) if self.rules.is_protected(table, &current) => Ok(RowAction::Skipped),
            Some(_) => {
                replica.update_by_identity(table, identity, row).await?;
                Ok(RowAction::Updated)
            }
            None => {
                replica.insert_row(table, row).await?;
                Ok(RowAction::Inserted)
            }
        }
    }
}
