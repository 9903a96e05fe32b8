//! Core utilities and types shared across all Nimbus crates

pub mod config;
pub mod error;
pub mod error_builder;
pub mod fs;
pub mod plugin;
pub mod problemdetails;
pub mod types;
pub mod validation;

pub use problemdetails::Problem;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use error_builder::*;
pub use types::*;

// Re-export external dependencies so downstream crates agree on versions
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
