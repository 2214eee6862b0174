//! # mnemo-cli
//!
//! Command-line interface for the Mnemo memory subsystem.
//!
//! ## Commands
//!
//! - `mnemo remember` / `mnemo recall`: write and read memories
//! - `mnemo stm`: inspect or clear a session's short-term window
//! - `mnemo ask`: build a standard or agentic RAG prompt
//! - `mnemo reflect` / `mnemo consolidate`: LLM synthesis over episodic memory
//! - `mnemo forget` / `mnemo policy` / `mnemo filters`: lifecycle rules
//! - `mnemo stats` / `mnemo export` / `mnemo purge`: reporting and cleanup
//! - `mnemo daemon`: run the forgetting scheduler and reflection worker
//! - `mnemo config show|validate`

pub mod app;
pub mod commands;
pub mod logging;

pub use app::App;
pub use commands::Cli;
