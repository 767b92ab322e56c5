//! Shared configuration, error types, IDs, and observability primitives for scanbridge crates.
//!
//! Architecture role:
//! - defines bridge configuration passed from the session down to every factory
//! - provides common [`BridgeError`] / [`Result`] contracts
//! - hosts prometheus metrics shared by factories and the session
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use ids::*;
pub use metrics::{MetricsRegistry, StatsOutcome};
