//! Target Registry
//!
//! Resolves the master and every replica into full connection targets and
//! opens them. A replica inherits every connection field it does not
//! override from the master.

use crate::config::{DatabaseConfig, DatabaseOverrides, ReplisyncConfig};
use crate::error::{Error, Result};
use crate::executor::{Connector, Database, Role};

/// Name under which the master is logged and reported
pub const MASTER_NAME: &str = "master";

/// A fully resolved database to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub name: String,
    pub config: DatabaseConfig,
}

impl ConnectionTarget {
    pub fn new(name: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Whether two targets point at the same database on the same server
    pub fn same_database(&self, other: &ConnectionTarget) -> bool {
        self.config.host.eq_ignore_ascii_case(&other.config.host)
            && self.config.port == other.config.port
            && self.config.dbname == other.config.dbname
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}:{}/{})",
            self.name, self.config.host, self.config.port, self.config.dbname
        )
    }
}

/// Master plus replicas in declaration order
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    master: ConnectionTarget,
    replicas: Vec<ConnectionTarget>,
}

/// A replica and the outcome of connecting to it
pub struct ReplicaConnection {
    pub target: ConnectionTarget,
    pub database: Result<Box<dyn Database>>,
}

/// Open connections for one run
pub struct Connections {
    pub master: Box<dyn Database>,
    pub replicas: Vec<ReplicaConnection>,
}

impl TargetRegistry {
    /// Resolve every replica against the master.
    ///
    /// A replica whose database name equals the master's is a
    /// [`Error::ConfigurationConflict`], whatever host it points at. Two
    /// replicas resolving to the same database on the same server are
    /// rejected as well.
    pub fn resolve(master: &DatabaseConfig, overrides: &[(String, DatabaseOverrides)]) -> Result<Self> {
        let master = ConnectionTarget::new(MASTER_NAME, master.clone());
        let mut replicas: Vec<ConnectionTarget> = Vec::with_capacity(overrides.len());

        for (name, fields) in overrides {
            let target = ConnectionTarget::new(name.clone(), master.config.merged_with(fields));

            if target.config.dbname == master.config.dbname {
                return Err(Error::ConfigurationConflict {
                    replica: name.clone(),
                    database: target.config.dbname.clone(),
                });
            }
            if let Some(other) = replicas.iter().find(|r| r.same_database(&target)) {
                return Err(Error::Config(format!(
                    "replicas '{}' and '{}' point at the same database",
                    other.name, name
                )));
            }

            replicas.push(target);
        }

        Ok(Self { master, replicas })
    }

    pub fn from_config(config: &ReplisyncConfig) -> Result<Self> {
        Self::resolve(&config.master, &config.replica_overrides()?)
    }

    pub fn master(&self) -> &ConnectionTarget {
        &self.master
    }

    pub fn replicas(&self) -> &[ConnectionTarget] {
        &self.replicas
    }

    /// Open the master and every replica.
    ///
    /// Failing to reach the master aborts; a replica that cannot be reached
    /// keeps its error so the run can report it and carry on.
    pub async fn connect(&self, connector: &dyn Connector) -> Result<Connections> {
        let master = connector.connect(&self.master, Role::Master).await?;

        let mut replicas = Vec::with_capacity(self.replicas.len());
        for target in &self.replicas {
            let database = connector.connect(target, Role::Replica).await;
            if let Err(e) = &database {
                tracing::error!(replica = %target, "Connection failed: {}", e);
            }
            replicas.push(ReplicaConnection {
                target: target.clone(),
                database,
            });
        }

        Ok(Connections { master, replicas })
    }
}
