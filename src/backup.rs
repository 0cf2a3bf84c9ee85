//! Replica Backup
//!
//! Dumps a replica to a file before its data is overwritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::registry::ConnectionTarget;

/// Produces a dump of one replica
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Dump the target and return the file written
    async fn dump(&self, target: &ConnectionTarget) -> Result<PathBuf>;
}

/// Dumps through the `mysqldump` client
#[derive(Debug, Clone)]
pub struct MysqlDump {
    dump_dir: PathBuf,
    program: PathBuf,
}

impl MysqlDump {
    pub fn new(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            program: PathBuf::from("mysqldump"),
        }
    }

    /// Use a specific dump program instead of `mysqldump` from PATH
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// File the dump of `target` is written to
    pub fn dump_path(&self, target: &ConnectionTarget) -> PathBuf {
        self.dump_dir
            .join(format!("dump_{}.sql", target.config.dbname))
    }

    fn locate(&self, database: &str) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| Error::Backup {
            database: database.to_string(),
            reason: format!("{} not found: {}", self.program.display(), e),
        })
    }

    fn command(program: &Path, target: &ConnectionTarget, output: &Path) -> Command {
        let config = &target.config;
        let mut cmd = Command::new(program);
        cmd.arg(format!("--host={}", config.host))
            .arg(format!("--port={}", config.port))
            .arg(format!("--user={}", config.user))
            .arg("--single-transaction")
            .arg("--routines")
            .arg(format!("--result-file={}", output.display()))
            .arg(&config.dbname)
            // Keep the password off the command line
            .env("MYSQL_PWD", &config.password)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BackupTool for MysqlDump {
    async fn dump(&self, target: &ConnectionTarget) -> Result<PathBuf> {
        let database = target.config.dbname.as_str();
        let program = self.locate(database)?;
        let output_path = self.dump_path(target);

        tracing::info!(replica = %target, path = %output_path.display(), "Dumping replica");

        let output = Self::command(&program, target, &output_path)
            .output()
            .await
            .map_err(|e| Error::Backup {
                database: database.to_string(),
                reason: format!("failed to run {}: {}", program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Backup {
                database: database.to_string(),
                reason: format!("{} exited with {}: {}", program.display(), output.status, stderr.trim()),
            });
        }

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::tempdir;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new(
            "staging",
            DatabaseConfig {
                host: "127.0.0.1".into(),
                port: 3306,
                user: "root".into(),
                password: "secret".into(),
                dbname: "shop_staging".into(),
                connect_timeout_secs: 5,
            },
        )
    }

    #[test]
    fn test_dump_path() {
        let dump = MysqlDump::new("/var/backups");
        assert_eq!(
            dump.dump_path(&target()),
            PathBuf::from("/var/backups/dump_shop_staging.sql")
        );
    }

    #[test]
    fn test_password_is_passed_through_environment() {
        let cmd = MysqlDump::command(Path::new("mysqldump"), &target(), Path::new("/tmp/out.sql"));
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().all(|a| !a.contains("secret")));
        assert_eq!(args.last().map(String::as_str), Some("shop_staging"));
        assert!(std_cmd
            .get_envs()
            .any(|(k, v)| k == "MYSQL_PWD" && v.map_or(false, |v| v == "secret")));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_backup_error() {
        let dir = tempdir().unwrap();
        let dump = MysqlDump::new(dir.path()).with_program("replisync-no-such-dump-tool");
        let err = dump.dump(&target()).await.unwrap_err();
        assert!(matches!(err, Error::Backup { ref database, .. } if database == "shop_staging"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_a_backup_error() {
        let dir = tempdir().unwrap();
        let dump = MysqlDump::new(dir.path()).with_program("false");
        assert!(matches!(dump.dump(&target()).await, Err(Error::Backup { .. })));
    }
}
