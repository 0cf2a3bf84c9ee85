//! Replisync - Master to Replica Database Mirroring
//!
//! Brings one or more replica MariaDB/MySQL databases into line with an
//! authoritative master on every run: the replica's structure is reconciled
//! to the master's, then each table is cleared and refilled from the master
//! in bounded chunks.
//!
//! # Architecture
//!
//! A run is a full scan-and-reconcile pass, not a replication stream.
//! Replicas are processed one at a time and tables one at a time; the master
//! is only ever read.
//!
//! # Features
//!
//! - Schema diff covering tables, columns (including order), indexes and
//!   foreign keys, applied as one batch per replica
//! - Chunked LIMIT/OFFSET copy sized by a load profile
//! - Per-table exception rules protecting replica rows from deletion and
//!   overwrite
//! - Optional `mysqldump` of each replica before it is touched
//! - Per-replica failure isolation with a distinct exit status

pub mod backup;
pub mod config;
pub mod console;
pub mod error;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod sync;
pub mod value;

pub use config::ReplisyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DatabaseConfig, LoadProfile, ReplisyncConfig};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{Database, MariaDbConnector};
    pub use crate::orchestrator::{RunOrchestrator, RunReport, RunSettings};
    pub use crate::registry::{ConnectionTarget, TargetRegistry};
    pub use crate::schema::{Schema, SchemaChange};
    pub use crate::sync::{ClearPolicy, ExceptionRules, SyncStats};
    pub use crate::value::{Row, Value};
}
