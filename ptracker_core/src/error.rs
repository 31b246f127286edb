//! Unified error handling for the performance tracker
//!
//! One error type is shared by the history log, the notifier bus, the scene
//! classifier and the policy consumers so callers can propagate with `?`.

use thiserror::Error;

/// Main error type for tracker operations
#[derive(Debug, Error)]
pub enum PtrackerError {
    /// I/O related errors (config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed argument, e.g. a zero-capacity log
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backing storage could not be allocated
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Handler identity already present on a notifier bus
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Resource not found (e.g. no device client registered)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The classifier worker thread could not be created
    #[error("Failed to start worker thread: {0}")]
    ThreadStart(String),

    /// Device client rejected a request
    #[error("Client '{op}' failed: {message}")]
    Client { op: &'static str, message: String },

    /// Operation not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal errors with source location for debugging.
    /// Use the `ptracker_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// return Err(ptracker_internal!("worker exited early: {:?}", state));
/// ```
#[macro_export]
macro_rules! ptracker_internal {
    ($($arg:tt)*) => {
        $crate::error::PtrackerError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using PtrackerError
pub type PtrackerResult<T> = std::result::Result<T, PtrackerError>;

/// Short alias
pub type Result<T> = PtrackerResult<T>;

impl From<toml::de::Error> for PtrackerError {
    fn from(err: toml::de::Error) -> Self {
        PtrackerError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for PtrackerError {
    fn from(err: toml::ser::Error) -> Self {
        PtrackerError::Config(format!("TOML serialization error: {}", err))
    }
}

// Helper methods
impl PtrackerError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PtrackerError::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        PtrackerError::InvalidArgument(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        PtrackerError::NotFound(msg.into())
    }

    /// Create a client failure for the named operation
    pub fn client<S: Into<String>>(op: &'static str, message: S) -> Self {
        PtrackerError::Client {
            op,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PtrackerError>();
    }

    #[test]
    fn internal_macro_captures_location() {
        let err = ptracker_internal!("bad phase {}", 3);
        match err {
            PtrackerError::Internal { message, file, line } => {
                assert_eq!(message, "bad phase 3");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn display_formats() {
        let err = PtrackerError::client("setup", "peer rejected");
        assert_eq!(err.to_string(), "Client 'setup' failed: peer rejected");
        let err = PtrackerError::invalid_argument("capacity must be >= 1");
        assert_eq!(err.to_string(), "Invalid argument: capacity must be >= 1");
    }

    #[test]
    fn toml_errors_become_config() {
        let err: PtrackerError = toml::from_str::<toml::Table>("= nope").unwrap_err().into();
        assert!(matches!(err, PtrackerError::Config(_)));
    }
}
