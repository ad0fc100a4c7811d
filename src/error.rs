//! Error types for epc
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, missing feature, malformed record)
//! - 3: Blocked by policy (lock held by a live process, dependency cycle)
//! - 4: Operation failed (write failure, IO error)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the epc CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for epc operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Malformed task record {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("Malformed epic document: {0}")]
    MalformedEpic(String),

    // Policy blocks (exit code 3)
    #[error("Lock timeout on feature '{feature}': held by pid {holder_pid}")]
    LockTimeout { feature: String, holder_pid: u32 },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Atomic write failed for {0}")]
    WriteFailure(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::FeatureNotFound(_)
            | Error::TaskNotFound(_)
            | Error::MalformedRecord { .. }
            | Error::MalformedEpic(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::LockTimeout { .. } | Error::CycleDetected { .. } => exit_codes::POLICY_BLOCKED,

            // Operation failures
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::WriteFailure(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for machine consumers, where the variant has any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::LockTimeout {
                feature,
                holder_pid,
            } => Some(serde_json::json!({
                "feature": feature,
                "holder_pid": holder_pid,
            })),
            Error::CycleDetected { cycle } => Some(serde_json::json!({ "cycle": cycle })),
            Error::MalformedRecord { path, reason } => Some(serde_json::json!({
                "path": path.to_string_lossy(),
                "reason": reason,
            })),
            _ => None,
        }
    }
}

/// Result type alias for epc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
