//! Replisync Error Types

use thiserror::Error;

/// Result type alias for Replisync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replisync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Replica '{replica}' resolves to the master database '{database}'; copying master onto itself is not allowed")]
    ConfigurationConflict { replica: String, database: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Schema error: {0}")]
    Schema(String),

    // Per-replica failures
    #[error("Schema reconciliation failed for '{replica}': {source}")]
    SchemaReconciliation {
        replica: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Data sync failed for table '{table}': {source}")]
    DataSync {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Backup failed for database '{database}': {reason}")]
    Backup { database: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is a configuration problem that must abort the whole run
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigParse(_) | Error::ConfigurationConflict { .. }
        )
    }

    /// Short label for the failure class, used in progress reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) | Error::ConfigurationConflict { .. } => {
                "configuration"
            }
            Error::SchemaReconciliation { .. } => "schema",
            Error::DataSync { .. } => "data",
            Error::Backup { .. } => "backup",
            Error::Database(_) | Error::QueryExecution(_) | Error::Schema(_) => "database",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Process exit code for a run aborted by this error
    pub fn exit_code(&self) -> u8 {
        if self.is_configuration() {
            2
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = Error::ConfigurationConflict {
            replica: "staging".into(),
            database: "shop".into(),
        };
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("staging"));

        let err = Error::Backup {
            database: "shop_copy".into(),
            reason: "exit status 2".into(),
        };
        assert!(!err.is_configuration());
        assert_eq!(err.kind(), "backup");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_wrapped_errors_keep_source() {
        let err = Error::DataSync {
            table: "orders".into(),
            source: Box::new(Error::QueryExecution("duplicate key".into())),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Query execution failed: duplicate key"));
        assert_eq!(err.kind(), "data");
    }
}
