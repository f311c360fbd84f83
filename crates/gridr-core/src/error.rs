//! Error handling for the backend contract and transport.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors from the command/file transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Local I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A command ran past the transport's execution timeout.
    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout {
        /// The command line that was running.
        command: String,
        /// The configured timeout.
        seconds: u64,
    },

    /// A command produced output that is not valid UTF-8.
    #[error("Undecodable output from command: {0}")]
    UndecodableOutput(String),

    /// The requested remote path does not exist.
    #[error("Remote file not found: {0}")]
    FileNotFound(String),

    /// Operation on a transport that was closed or never connected.
    #[error("Transport not connected")]
    NotConnected,
}

/// Result type for backend (LRMS) operations.
pub type LrmsResult<T> = Result<T, LrmsError>;

/// Errors from backend adapters and the driver built on top of them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LrmsError {
    /// The backend refused the submission, or its answer to the submission
    /// command could not be parsed. Not retried by the engine.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// A status or accounting query failed or returned nothing. Retried by
    /// the grace-window mechanism; surfaced only once the window expires.
    #[error("Information system gave no answer: {0}")]
    TransientInfoSystem(String),

    /// The backend reported a status string outside the mapping table.
    /// A compatibility problem, always surfaced, never guessed around.
    #[error("Unknown job state reported by backend: {state:?}")]
    UnknownJobState {
        /// The unrecognized status string.
        state: String,
    },

    /// Downloading job output failed.
    #[error("Data staging failed for {path}: {message}")]
    DataStaging {
        /// The file being staged.
        path: String,
        /// Whether retrying the download is safe and worthwhile.
        recoverable: bool,
        /// Cause.
        message: String,
    },

    /// The capacity query failed. Does not affect tracked job state.
    #[error("Resource query failed: {0}")]
    ResourceQuery(String),

    /// The operation needs a backend job id the job does not have yet.
    #[error("Job has no backend id (not submitted, or submission failed)")]
    MissingJobId,

    /// A malformed line inside an otherwise successful backend answer.
    #[error("Unparseable backend output: {0}")]
    Parse(String),

    /// No configured resource admits the job's request.
    #[error("No matching resource for job {0}")]
    NoMatchingResource(String),

    /// Bad or incomplete resource configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure underneath a backend operation.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A quantity string in backend output or configuration is invalid.
    #[error("Quantity error: {0}")]
    Quantity(#[from] gridr_units::ParseQuantityError),
}

impl LrmsError {
    /// Whether the condition is transient and retrying the operation can
    /// be expected to help.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LrmsError::TransientInfoSystem(_) => true,
            LrmsError::DataStaging { recoverable, .. } => *recoverable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LrmsError::Submission("invalid account".to_string());
        assert_eq!(err.to_string(), "Submission failed: invalid account");

        let err = LrmsError::UnknownJobState {
            state: "SPECIAL_EXIT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown job state reported by backend: \"SPECIAL_EXIT\""
        );

        let err = TransportError::CommandTimeout {
            command: "squeue --noheader".to_string(),
            seconds: 60,
        };
        assert_eq!(
            err.to_string(),
            "Command timed out after 60s: squeue --noheader"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(LrmsError::TransientInfoSystem("empty".into()).is_recoverable());
        assert!(
            LrmsError::DataStaging {
                path: "out.txt".into(),
                recoverable: true,
                message: "connection reset".into(),
            }
            .is_recoverable()
        );
        assert!(!LrmsError::MissingJobId.is_recoverable());
        assert!(!LrmsError::Submission("no".into()).is_recoverable());
    }
}
