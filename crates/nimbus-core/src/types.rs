//! Shared types used across the Nimbus workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard datetime type for all timestamps stored or exchanged by Nimbus.
pub type UtcDateTime = DateTime<Utc>;

/// Database column alias for timestamps; identical to [`UtcDateTime`] but
/// named separately so entity code reads like the schema.
pub type DbDateTime = DateTime<Utc>;

/// Severity of a log line captured from a function container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One log line emitted by a user function during an invocation.
///
/// This is the wire shape of the entries inside the container-produced
/// `logs.json` file and of the `logs` column on invocation rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunctionLogEntry {
    pub level: LogLevel,
    pub message: String,
    #[schema(value_type = String, format = "date-time")]
    pub timestamp: UtcDateTime,
}

/// The envelope a caller submits to the invocation endpoint and the shape
/// written to `request.json` inside the shared invocation directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RequestEnvelope {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub query: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub body: serde_json::Value,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// The response a function writes to `result.json`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub status_code: u16,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub body: serde_json::Value,
}

impl ResponseEnvelope {
    /// A synthesized error response used when the container produced no
    /// usable result file.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            headers: Default::default(),
            body: serde_json::json!({ "error": message.into() }),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status_code: 504,
            headers: Default::default(),
            body: serde_json::json!({ "error": "function timed out" }),
        }
    }
}
