//! Replisync Configuration
//!
//! This module provides configuration structures for a mirror run: the
//! master connection, partial overrides for each replica, per-table
//! exception rules, and the run switches (load profile, logging, dumps).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::{ClearPolicy, ExceptionRules};

/// Main Replisync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplisyncConfig {
    /// Authoritative source database, never written to
    pub master: DatabaseConfig,

    /// Replica name -> partial override of the master's connection fields.
    /// Kept as a raw table so declaration order survives parsing.
    #[serde(default)]
    pub copies: toml::Table,

    /// Table -> column -> protected values
    #[serde(default, alias = "exceptValues")]
    pub except_values: toml::Table,

    /// Directory receiving error.log, notice.log and info.log
    #[serde(alias = "logPath")]
    pub log_path: PathBuf,

    /// Directory receiving replica dumps
    #[serde(default, alias = "testDumpPath")]
    pub test_dump_path: Option<PathBuf>,

    /// Mirror progress lines into info.log
    #[serde(default, alias = "advancedLog")]
    pub advanced_log: bool,

    /// Print progress lines to the console
    #[serde(default = "default_true", alias = "consoleOutput")]
    pub console_output: bool,

    /// Dump every replica before its data is synchronized
    #[serde(default, alias = "makeTestDump")]
    pub make_test_dump: bool,

    /// Load profile selecting the chunk size
    #[serde(default)]
    pub highload: LoadProfile,

    /// Which exception rules protect rows from the clearing step
    #[serde(default, alias = "clearPolicy")]
    pub clear_policy: ClearPolicy,

    /// Level for the stderr diagnostics layer (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "logLevel")]
    pub log_level: String,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// MariaDB host
    pub host: String,

    /// MariaDB port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database name
    #[serde(alias = "database")]
    pub dbname: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Replica-specific connection fields; anything left out is taken from the master
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "database")]
    pub dbname: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

/// Load profile, selecting how many rows are pulled from the master per chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadProfile {
    Low,
    #[default]
    Middle,
    Hard,
    Full,
}

impl LoadProfile {
    /// Rows per chunk for this profile
    pub fn chunk_size(&self) -> u64 {
        match self {
            LoadProfile::Low => 20,
            LoadProfile::Middle => 200,
            LoadProfile::Hard => 500,
            LoadProfile::Full => 2500,
        }
    }
}

impl std::fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadProfile::Low => "low",
            LoadProfile::Middle => "middle",
            LoadProfile::Hard => "hard",
            LoadProfile::Full => "full",
        };
        f.write_str(name)
    }
}

// Default value functions
fn default_db_port() -> u16 {
    3306
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl DatabaseConfig {
    /// Copy of this configuration with the given overrides applied (overrides win)
    pub fn merged_with(&self, overrides: &DatabaseOverrides) -> DatabaseConfig {
        DatabaseConfig {
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            user: overrides.user.clone().unwrap_or_else(|| self.user.clone()),
            password: overrides
                .password
                .clone()
                .unwrap_or_else(|| self.password.clone()),
            dbname: overrides.dbname.clone().unwrap_or_else(|| self.dbname.clone()),
            connect_timeout_secs: overrides
                .connect_timeout_secs
                .unwrap_or(self.connect_timeout_secs),
        }
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ReplisyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ReplisyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let master = &self.master;
        for (field, value) in [
            ("host", &master.host),
            ("dbname", &master.dbname),
            ("user", &master.user),
            ("password", &master.password),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("master.{} cannot be empty", field)));
            }
        }

        self.replica_overrides()?;
        ExceptionRules::from_config(&self.except_values)?;

        if !self.log_path.is_dir() {
            return Err(Error::Config(format!(
                "log_path {:?} is not an existing directory",
                self.log_path
            )));
        }

        match &self.test_dump_path {
            Some(path) if !path.is_dir() => {
                return Err(Error::Config(format!(
                    "test_dump_path {:?} is not an existing directory",
                    path
                )));
            }
            None if self.make_test_dump => {
                return Err(Error::Config(
                    "test_dump_path is required when make_test_dump is enabled".into(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Replica overrides in declaration order
    pub fn replica_overrides(&self) -> Result<Vec<(String, DatabaseOverrides)>> {
        self.copies
            .iter()
            .map(|(name, value)| {
                if name.trim().is_empty() {
                    return Err(Error::Config("copies contains an empty replica name".into()));
                }
                let overrides: DatabaseOverrides = value
                    .clone()
                    .try_into()
                    .map_err(|e| Error::Config(format!("copies.{}: {}", name, e)))?;
                Ok((name.clone(), overrides))
            })
            .collect()
    }

    /// Get the configured chunk size
    pub fn chunk_size(&self) -> u64 {
        self.highload.chunk_size()
    }

    /// Sample configuration written by `replisync init`
    pub fn sample() -> &'static str {
        r#"# Replisync configuration

log_path = "/var/log/replisync"
test_dump_path = "/var/backups/replisync"

# Mirror progress into info.log / print progress to the console
advanced_log = false
console_output = true

# Dump every replica with mysqldump before its data is replaced
make_test_dump = false

# low = 20, middle = 200, hard = 500, full = 2500 rows per chunk
highload = "middle"

# "all-rules" keeps rows protected by any rule column while clearing,
# "first-rule" only honours the first column declared for the table
clear_policy = "all-rules"

[master]
host = "db-primary.internal"
port = 3306
user = "replisync"
password = "change-me"
dbname = "shop"

# Every field not given here is taken from [master]
[copies.staging]
dbname = "shop_staging"

[copies.testing]
host = "db-test.internal"
dbname = "shop_test"

# Rows whose column holds one of these values are never overwritten or deleted
[except_values.orders]
status = ["reserved"]
"#
    }
}
