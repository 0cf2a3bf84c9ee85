//! Database Executor Module
//!
//! The capability interface every backend implements: schema introspection,
//! DDL application, and the row operations the synchronizer needs.

mod mariadb;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use mariadb::{MariaDbConnector, MariaDbExecutor};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryConnector, MemoryDatabase, MemoryStats};

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::ConnectionTarget;
use crate::schema::{Schema, SchemaChange};
use crate::sync::ClearStatement;
use crate::value::{Row, Value};

/// Which side of the mirror a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read-only source
    Master,
    /// Mutable destination
    Replica,
}

/// A live connection to one database
#[async_trait]
pub trait Database: Send + Sync {
    /// Target name ("master" or the replica's name)
    fn name(&self) -> &str;

    /// Introspect tables, columns, indexes and foreign keys
    async fn load_schema(&self) -> Result<Schema>;

    /// Apply structural changes in order inside a single transaction
    async fn apply_schema_changes(&self, changes: &[SchemaChange]) -> Result<()>;

    /// Current number of rows in a table
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Up to `limit` rows starting at `offset`, in the table's natural order
    async fn fetch_chunk(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<Row>>;

    /// First row whose `column` equals `value`; NULL never matches
    async fn find_by_identity(&self, table: &str, column: &str, value: &Value)
        -> Result<Option<Row>>;

    /// Insert a full row
    async fn insert_row(&self, table: &str, row: &Row) -> Result<()>;

    /// Overwrite every column of the rows whose `column` equals the row's value there
    async fn update_by_identity(&self, table: &str, column: &str, row: &Row) -> Result<u64>;

    /// Empty a table ahead of synchronization
    async fn clear_table(&self, statement: &ClearStatement) -> Result<()>;

    /// Close the connection
    async fn close(&self);
}

/// Opens connections to resolved targets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget, role: Role) -> Result<Box<dyn Database>>;
}
