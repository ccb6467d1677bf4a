use crate::config::DatabaseConfig;
use crate::db::PostgresBootstrapper;
use crate::error::StackInitError;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// What a successful create reports back to the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub physical_resource_id: String,
    pub data: HashMap<String, String>,
}

/// Performs the create-time side effect of the custom resource.
pub trait Provisioner: Send + Sync {
    fn provision(&self) -> impl Future<Output = Result<Provisioned, StackInitError>> + Send;
}

impl Provisioner for PostgresBootstrapper {
    async fn provision(&self) -> Result<Provisioned, StackInitError> {
        self.bootstrap().await?;
        let name = self.config().name.clone();
        Ok(Provisioned {
            physical_resource_id: name.clone(),
            data: HashMap::from([("DatabaseName".to_string(), name)]),
        })
    }
}

/// Provisioner chosen at cold start. A configuration that failed to load is
/// kept as text so update and delete can still be acknowledged.
#[derive(Debug)]
pub enum DatabaseProvisioner {
    Ready(PostgresBootstrapper),
    Unconfigured(String),
}

impl DatabaseProvisioner {
    pub fn from_env() -> Self {
        match DatabaseConfig::from_env() {
            Ok(cfg) => {
                if !cfg.has_plain_identifier_name() {
                    warn!(
                        database = %cfg.name,
                        "database name is not a plain identifier; it is used unquoted"
                    );
                }
                info!(
                    user = %cfg.user,
                    host = %cfg.host,
                    port = cfg.host_port,
                    database = %cfg.name,
                    ssl_mode = ?cfg.ssl_mode
                );
                DatabaseProvisioner::Ready(PostgresBootstrapper::new(cfg))
            }
            Err(e) => {
                error!(error = %e, "database configuration failed to load");
                DatabaseProvisioner::Unconfigured(e.to_string())
            }
        }
    }
}

impl Provisioner for DatabaseProvisioner {
    async fn provision(&self) -> Result<Provisioned, StackInitError> {
        match self {
            DatabaseProvisioner::Ready(bootstrapper) => bootstrapper.provision().await,
            DatabaseProvisioner::Unconfigured(reason) => {
                Err(StackInitError::Unconfigured(reason.clone()))
            }
        }
    }
}
