//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero status.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::service::ServiceError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Local file I/O error
    IoError,
    /// Destructive command run without confirmation
    ConfirmationRequired,
    /// The operation itself failed; carries the service's code
    Operation(&'static str),
    /// Server could not start
    ServeFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "VAULT_CLI_CONFIG_ERROR",
            Self::IoError => "VAULT_CLI_IO_ERROR",
            Self::ConfirmationRequired => "VAULT_CLI_CONFIRMATION_REQUIRED",
            Self::Operation(code) => *code,
            Self::ServeFailed => "VAULT_CLI_SERVE_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn confirmation_required() -> Self {
        Self::new(
            CliErrorCode::ConfirmationRequired,
            "Reset deletes every record and cannot be undone. Re-run with --yes.",
        )
    }

    pub fn serve_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ServeFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

/// The operator sees the client-safe message; the cause goes to the log.
impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        if let Some(cause) = std::error::Error::source(&e) {
            tracing::error!(code = e.code(), error = %e, cause = %cause, "operation failed");
        }
        Self::new(CliErrorCode::Operation(e.code()), e.message())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::confirmation_required();
        assert!(err.to_string().starts_with("VAULT_CLI_CONFIRMATION_REQUIRED: "));
    }

    #[test]
    fn test_service_code_passes_through() {
        let err = CliError::from(ServiceError::in_progress());
        assert_eq!(err.code_str(), "VAULT_OPERATION_IN_PROGRESS");
    }
}
