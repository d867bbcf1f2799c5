//! Catalog gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Catalog gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The server could not be reached or refused the login.
    #[error("cannot connect to {server}: {message}")]
    Connectivity {
        /// Server the connection was attempted against.
        server: String,
        /// Driver message.
        message: String,
    },

    /// A connect or statement deadline elapsed.
    #[error("{operation} on {server} timed out after {}s", elapsed.as_secs())]
    Timeout {
        /// Server the call was made against.
        server: String,
        /// What timed out (`connect`, or a statement label).
        operation: String,
        /// Deadline that elapsed.
        elapsed: Duration,
    },

    /// The server rejected or failed a statement.
    #[error("{label} failed: {message}")]
    Execution {
        /// Statement label.
        label: String,
        /// Server message.
        message: String,
    },

    /// A result row did not have the expected shape.
    #[error("column '{column}' in {label}: {message}")]
    Column {
        /// Statement label.
        label: String,
        /// Column name.
        column: String,
        /// What was wrong with it.
        message: String,
    },

    /// A sensitive value could not be decrypted.
    #[error("cannot decrypt sensitive variable {variable_id} of environment {environment_id}: {message}")]
    DecryptionFailed {
        /// Owning environment.
        environment_id: i64,
        /// Variable that failed to decrypt.
        variable_id: i64,
        /// Underlying reason.
        message: String,
    },

    /// The catalog held a value the model does not recognise.
    #[error("unrecognised {field} '{value}'")]
    Unrecognised {
        /// Field being decoded.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Gateway configuration is incomplete.
    #[error("gateway configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether this error means the server is unreachable, which aborts a run.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Connectivity { .. })
            || matches!(self, GatewayError::Timeout { operation, .. } if operation == "connect")
    }

    /// Whether the server reported that the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, GatewayError::Execution { message, .. } if message.contains("already exists"))
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_is_connectivity() {
        let err = GatewayError::Timeout {
            server: "sql01".to_string(),
            operation: "connect".to_string(),
            elapsed: Duration::from_secs(15),
        };
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), "connect on sql01 timed out after 15s");
    }

    #[test]
    fn test_statement_timeout_is_not_connectivity() {
        let err = GatewayError::Timeout {
            server: "sql01".to_string(),
            operation: "environments".to_string(),
            elapsed: Duration::from_secs(60),
        };
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_already_exists_detection() {
        let err = GatewayError::Execution {
            label: "create_environment".to_string(),
            message: "The environment 'E1' already exists or you have not been granted the appropriate permissions to create it.".to_string(),
        };
        assert!(err.is_already_exists());
        assert!(!err.is_connectivity());
    }
}
