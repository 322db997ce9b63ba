//! Host binary support library for the common game server.
//!
//! Ties the foundation, plugin system, and backend services together:
//! configuration and CLI parsing, logging setup, signal handling, and
//! the [`runtime::ServerRuntime`] that drives it all.

pub mod cli;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod signals;

pub use cli::CliArgs;
pub use config::AppConfig;
pub use runtime::ServerRuntime;
