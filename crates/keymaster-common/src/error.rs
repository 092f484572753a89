//! Error types for keymaster operations.
//!
//! Every collaborator (supplier, applier, shell) reports failures through
//! [`KeymasterError`]. The reconciler decides what to do with them; nothing
//! below it terminates the process.

use keymaster_types::ParseError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for keymaster operations.
pub type KeymasterResult<T> = Result<T, KeymasterError>;

#[derive(Debug, Error)]
pub enum KeymasterError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        command: String,
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Transport-level HTTP failure or an unexpected status code.
    #[error("HTTP request failed: {operation}: {message}")]
    Http {
        /// What was being done (e.g., "GET /api/configs/").
        operation: String,
        message: String,
        status: Option<u16>,
    },

    /// A supplier answered, but the body could not be understood.
    #[error("Invalid response from {source_name}: {message}")]
    InvalidResponse {
        source_name: String,
        message: String,
    },

    /// A supplier returned data that violates its contract
    /// (e.g., two interfaces with the same name).
    #[error("Supplier contract violated by {supplier}: {message}")]
    SupplierContract { supplier: String, message: String },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An applier was asked to create an interface without a private key.
    #[error("Interface '{interface}' has no private key")]
    MissingPrivateKey { interface: String },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KeymasterError {
    pub fn http(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn http_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            message: format!("status {}: {}", status, body.into()),
            status: Some(status),
        }
    }

    pub fn invalid_response(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn supplier_contract(supplier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SupplierContract {
            supplier: supplier.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn missing_private_key(interface: impl Into<String>) -> Self {
        Self::MissingPrivateKey {
            interface: interface.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on a later pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeymasterError::Http { status, .. } => {
                // 4xx other than throttling means the request itself is wrong
                !matches!(status, Some(s) if (400..500).contains(s) && *s != 408 && *s != 429)
            }
            KeymasterError::ShellCommandFailed { .. }
            | KeymasterError::ShellExec { .. }
            | KeymasterError::Io { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error comes from bad operator input and should
    /// stop the daemon at startup.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            KeymasterError::InvalidConfig { .. } | KeymasterError::Parse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_failed() {
        let err = KeymasterError::ShellCommandFailed {
            command: "ip link add dev wg0 type wireguard".to_string(),
            exit_code: 2,
            output: "RTNETLINK answers: Operation not supported".to_string(),
        };
        assert!(err.to_string().contains("ip link add dev"));
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn test_http_status_display() {
        let err = KeymasterError::http_status("GET /api/configs/", 503, "maintenance");
        assert_eq!(
            err.to_string(),
            "HTTP request failed: GET /api/configs/: status 503: maintenance"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(KeymasterError::http("GET /api/configs/", "connection refused").is_retryable());
        assert!(KeymasterError::http_status("GET", 503, "").is_retryable());
        assert!(KeymasterError::http_status("GET", 429, "").is_retryable());
        assert!(!KeymasterError::http_status("GET", 401, "").is_retryable());
        assert!(!KeymasterError::internal("bug").is_retryable());
        assert!(!KeymasterError::supplier_contract("file", "duplicate").is_retryable());
    }

    #[test]
    fn test_is_config_error() {
        assert!(KeymasterError::invalid_config("sync_period_secs", "must be > 0").is_config_error());
        let parse: KeymasterError = ParseError::InvalidKey("short".to_string()).into();
        assert!(parse.is_config_error());
        assert!(!KeymasterError::http("GET", "timeout").is_config_error());
    }
}
