//! Error types for the replication engine.

use std::path::PathBuf;

use ferry_catalog::GatewayError;
use thiserror::Error;

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A value that cannot be re-encoded for its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Boolean value other than True/False/1/0.
    #[error("'{value}' is not a valid Boolean")]
    InvalidBoolean { value: String },

    /// Numeric value that does not parse, or does not fit the declared width.
    #[error("'{value}' is not a valid {data_type}")]
    InvalidNumber { value: String, data_type: String },

    /// Date/time value in an unrecognised format.
    #[error("'{value}' is not a valid DateTime")]
    InvalidDateTime { value: String },

    /// Declared type name the catalog does not define.
    #[error("unsupported declared type '{declared}'")]
    UnsupportedType { declared: String },

    /// Literal text that is not in the form produced by `encode`.
    #[error("malformed literal '{0}'")]
    MalformedLiteral(String),
}

/// Errors that abort a run, or a scope of it.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A server could not be reached. Raised before any planning.
    #[error("connectivity failure: {0}")]
    Connectivity(GatewayError),

    /// The folder does not exist on the named server.
    #[error("folder '{folder}' does not exist on {server}")]
    FolderMissing { server: String, folder: String },

    /// The project does not exist in the folder on the named server.
    #[error("project '{project}' does not exist in folder '{folder}' on {server}")]
    ProjectMissing {
        server: String,
        folder: String,
        project: String,
    },

    /// Any other gateway failure while reading.
    #[error(transparent)]
    Gateway(GatewayError),

    /// Value re-encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Writing an exported file failed.
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        if err.is_connectivity() {
            SyncError::Connectivity(err)
        } else {
            SyncError::Gateway(err)
        }
    }
}

impl SyncError {
    /// Whether the error is a precondition failure (missing folder or project).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::FolderMissing { .. } | SyncError::ProjectMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gateway_errors_are_classified() {
        let err: SyncError = GatewayError::Connectivity {
            server: "src".into(),
            message: "refused".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Connectivity(_)));

        let err: SyncError = GatewayError::Timeout {
            server: "src".into(),
            operation: "connect".into(),
            elapsed: Duration::from_secs(15),
        }
        .into();
        assert!(matches!(err, SyncError::Connectivity(_)));

        let err: SyncError = GatewayError::Execution {
            label: "environments".into(),
            message: "boom".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Gateway(_)));
        assert_eq!(err.to_string(), "environments failed: boom");
    }

    #[test]
    fn test_precondition_errors() {
        let err = SyncError::FolderMissing {
            server: "tgt".into(),
            folder: "ETL".into(),
        };
        assert!(err.is_precondition());
        assert_eq!(err.to_string(), "folder 'ETL' does not exist on tgt");
        assert!(!SyncError::Codec(CodecError::MalformedLiteral("x".into())).is_precondition());
    }
}
