pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod service;
pub mod types;

pub use config::DatabaseConfig;
pub use db::PostgresBootstrapper;
pub use error::StackInitError;
