//! Database module: one-shot provisioning of the application database.
//!
//! Layout:
//! - `postgres.rs`: `CREATE DATABASE` plus init script execution over two
//!   short-lived connections (no pool)

pub mod postgres;

pub use postgres::{INIT_SCRIPT_PATH, PostgresBootstrapper};
