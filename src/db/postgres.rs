use crate::config::DatabaseConfig;
use crate::error::StackInitError;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, Executor, PgConnection};
use std::path::PathBuf;
use tracing::{debug, info};

/// Init script shipped next to the function binary.
pub const INIT_SCRIPT_PATH: &str = "index.sql";

/// Creates the configured database and runs the init script against it.
#[derive(Debug, Clone)]
pub struct PostgresBootstrapper {
    config: DatabaseConfig,
    script_path: PathBuf,
}

impl PostgresBootstrapper {
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_script(config, INIT_SCRIPT_PATH)
    }

    pub fn with_script(config: DatabaseConfig, script_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            script_path: script_path.into(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Two-phase bootstrap. Nothing is undone on failure: if the script
    /// fails, the freshly created database stays behind.
    pub async fn bootstrap(&self) -> Result<(), StackInitError> {
        self.create_database().await?;
        let script = self.read_script().await?;
        self.run_script(&script).await
    }

    /// `CREATE DATABASE` on the administrative database.
    pub async fn create_database(&self) -> Result<(), StackInitError> {
        let name = &self.config.name;
        let mut conn = connect(&self.config.admin_connect_options()).await?;

        // Single statement outside any transaction block; the name is used as given.
        let statement = format!("CREATE DATABASE {name}");
        let result = conn.execute(sqlx::raw_sql(&statement)).await;
        let closed = conn.close().await;
        result.map_err(|e| StackInitError::from_create_database(e, name))?;
        closed?;

        info!(database = %name, host = %self.config.host, "database created");
        Ok(())
    }

    /// Run the whole script as one batch against the target database.
    pub async fn run_script(&self, script: &str) -> Result<(), StackInitError> {
        let mut conn = connect(&self.config.target_connect_options()).await?;
        let result = conn.execute(sqlx::raw_sql(script)).await;
        let closed = conn.close().await;
        let done = result?;
        closed?;

        info!(
            database = %self.config.name,
            rows_affected = done.rows_affected(),
            "init script executed"
        );
        Ok(())
    }

    async fn read_script(&self) -> Result<String, StackInitError> {
        let script = tokio::fs::read_to_string(&self.script_path)
            .await
            .map_err(|source| StackInitError::Script {
                path: self.script_path.clone(),
                source,
            })?;
        debug!(path = %self.script_path.display(), bytes = script.len(), "init script loaded");
        Ok(script)
    }
}

async fn connect(options: &PgConnectOptions) -> Result<PgConnection, StackInitError> {
    let conn = PgConnection::connect_with(options).await?;
    debug!(
        host = options.get_host(),
        database = options.get_database().unwrap_or_default(),
        "connected"
    );
    Ok(conn)
}
