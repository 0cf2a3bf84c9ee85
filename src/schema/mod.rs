//! Schema Module
//!
//! Structural model of a database, the diff between two of them, and the
//! reconciliation that makes a replica match the master.

mod change;
mod diff;
mod model;
mod reconciler;

pub use change::{ColumnPosition, SchemaChange};
pub use diff::diff;
pub use model::{ColumnSchema, ForeignKeySchema, IndexSchema, Schema, TableSchema, PRIMARY_INDEX};
pub use reconciler::{reconcile, reconcile_with, ReconcileSummary};
