//! Foundation layer for the common game server framework.
//!
//! This crate provides the shared building blocks used by every other layer:
//!
//! - [`types`] - Strongly-typed identifiers (player, session)
//! - [`error`] - The [`CgsError`] taxonomy and [`CgsResult`] alias
//! - [`config`] - YAML configuration with dotted-key access and change watchers
//! - [`metrics`] - Counters, gauges, histograms, and health reporting
//! - [`jobs`] - Priority worker pool with dependencies and tick jobs
//! - [`registry`] - Type-keyed service registry shared with plugins

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod registry;
pub mod types;

pub use config::ConfigManager;
pub use error::{CgsError, CgsResult};
pub use jobs::{JobId, JobPriority, JobScheduler};
pub use metrics::{GameMetrics, HealthStatus, HistogramBuckets};
pub use registry::ServiceRegistry;
pub use types::{PlayerId, SessionId};
