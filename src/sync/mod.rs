//! Data Synchronization Module
//!
//! Exception rules and the per-table copy from master to replica.

mod exceptions;
mod synchronizer;

pub use exceptions::{ClearPolicy, ClearStatement, ColumnRule, ExceptionRules};
pub use synchronizer::{SyncCursor, SyncStats, TableSynchronizer};
