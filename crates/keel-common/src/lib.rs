//! Common types for keel: errors, configuration, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use config::KeelConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
