use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HovelError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{tool} failed (exit {exit_code:?})\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    ExternalToolFailure {
        tool: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("Credential rejected: {0}")]
    CredentialRejected(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Descriptor error: {0}")]
    DescriptorError(#[from] serde_yaml::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl HovelError {
    /// Short one-line form used for task error text and record `last_error`.
    pub fn summary(&self) -> String {
        match self {
            HovelError::ExternalToolFailure {
                tool,
                exit_code,
                stderr,
                ..
            } => {
                let tail = stderr.lines().last().unwrap_or("").trim();
                if tail.is_empty() {
                    format!("{} failed (exit {:?})", tool, exit_code)
                } else {
                    format!("{} failed (exit {:?}): {}", tool, exit_code, tail)
                }
            }
            other => other.to_string(),
        }
    }

    /// Stable snake_case kind, surfaced in JSON error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            HovelError::NotFound(_) => "not_found",
            HovelError::Conflict(_) => "conflict",
            HovelError::ValidationError(_) => "validation_error",
            HovelError::ExternalToolFailure { .. } => "external_tool_failure",
            HovelError::CredentialRejected(_) => "credential_rejected",
            HovelError::Timeout(_) => "timeout",
            HovelError::LockPoisoned(_) => "lock_poisoned",
            HovelError::IoError(_) => "io_failure",
            HovelError::SerializationError(_) => "serialization_error",
            HovelError::DescriptorError(_) => "descriptor_error",
            HovelError::ConfigError(_) => "config_error",
        }
    }
}
