//! # mnemo-config
//!
//! Configuration for the Mnemo memory subsystem. Reads from `mnemo.toml`,
//! then environment variables, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::MnemoConfig;
pub use schema::{ConfigWarning, WarningSeverity};
