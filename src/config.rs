//! Connection settings for the target PostgreSQL server.
//!
//! Loaded once at cold start from `CLAY_DATABASE_*` environment variables:
//!
//! | variable                  | field      | required |
//! |---------------------------|------------|----------|
//! | `CLAY_DATABASE_USER`      | `user`     | yes      |
//! | `CLAY_DATABASE_PASSWORD`  | `password` | yes      |
//! | `CLAY_DATABASE_HOST`      | `host`     | yes      |
//! | `CLAY_DATABASE_HOST_PORT` | `host_port`| yes      |
//! | `CLAY_DATABASE_NAME`      | `name`     | yes      |
//! | `CLAY_DATABASE_SSL_MODE`  | `ssl_mode` | no (`prefer`) |

use figment::{Figment, providers::Serialized};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::StackInitError;

pub const ENV_PREFIX: &str = "CLAY_DATABASE_";

/// Administrative database every PostgreSQL server ships with.
pub const ADMIN_DATABASE: &str = "postgres";

/// Settings exactly as they appear in the environment. Everything is kept as
/// text so passwords such as `0123` survive untouched.
#[derive(Deserialize)]
struct RawDatabaseConfig {
    user: String,
    password: String,
    host: String,
    host_port: String,
    name: String,
    #[serde(default)]
    ssl_mode: Option<String>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub host_port: u16,
    pub name: String,
    pub ssl_mode: PgSslMode,
}

impl DatabaseConfig {
    /// Every `CLAY_DATABASE_*` variable, keyed by its lowercased suffix.
    pub fn figment() -> Figment {
        let vars: BTreeMap<String, String> = env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|suffix| (suffix.to_ascii_lowercase(), v))
            })
            .collect();
        Figment::new().merge(Serialized::defaults(vars))
    }

    /// Extract and validate the configuration from the process environment.
    pub fn from_env() -> Result<Self, StackInitError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, StackInitError> {
        let raw: RawDatabaseConfig = figment.extract()?;
        Self::validate(raw)
    }

    fn validate(raw: RawDatabaseConfig) -> Result<Self, StackInitError> {
        for (key, value) in [("USER", &raw.user), ("HOST", &raw.host), ("NAME", &raw.name)] {
            if value.trim().is_empty() {
                return Err(StackInitError::InvalidConfig(format!(
                    "{ENV_PREFIX}{key} must not be empty"
                )));
            }
        }

        let host_port = raw
            .host_port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                StackInitError::InvalidConfig(format!(
                    "{ENV_PREFIX}HOST_PORT must be a port number (got {})",
                    raw.host_port
                ))
            })?;

        let ssl_mode = match raw.ssl_mode.as_deref().map(str::trim) {
            None | Some("") => PgSslMode::Prefer,
            Some(mode) => PgSslMode::from_str(mode).map_err(|_| {
                StackInitError::InvalidConfig(format!(
                    "{ENV_PREFIX}SSL_MODE must be one of disable, allow, prefer, require, verify-ca, verify-full (got {mode})"
                ))
            })?,
        };

        Ok(Self {
            user: raw.user,
            password: raw.password,
            host: raw.host,
            host_port,
            name: raw.name,
            ssl_mode,
        })
    }

    /// The name is spliced into `CREATE DATABASE` verbatim, so anything other
    /// than a plain lowercase identifier may be rewritten or rejected by the server.
    pub fn has_plain_identifier_name(&self) -> bool {
        let mut chars = self.name.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
    }

    /// Options for the server's administrative database.
    pub fn admin_connect_options(&self) -> PgConnectOptions {
        self.connect_options(ADMIN_DATABASE)
    }

    /// Options for the database this handler creates.
    pub fn target_connect_options(&self) -> PgConnectOptions {
        self.connect_options(&self.name)
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.host_port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
            .ssl_mode(self.ssl_mode)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("host_port", &self.host_port)
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}
