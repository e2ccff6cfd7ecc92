//! Engine Error Taxonomy
//!
//! Every failure the engine can report falls into one of four classes:
//!
//! - [`EngineError::Configuration`]: malformed descriptors, undefined
//!   placeholders, arity mismatches. Fatal at build time, never retried.
//! - [`EngineError::Execution`]: non-zero exit codes and instance-level I/O
//!   failures. Retryable per the descriptor's retry directive.
//! - [`EngineError::MissingOutput`]: zero exit code but a mandatory output
//!   pattern matched no files (or a single-file port matched several). A bug
//!   in the task itself, so not retried unless explicitly configured.
//! - [`EngineError::Io`] / [`EngineError::Manifest`]: wrapped errors from the
//!   cache store and sandbox plumbing.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// All errors the workflow engine can produce.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed workflow definition. Aborts graph construction (or the run,
    /// when only detectable once data arrives).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A task instance exited with a non-zero status or failed during
    /// staging/execution. Eligible for retry.
    #[error("task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    /// The command exited cleanly but its declared outputs are wrong.
    #[error("task '{task}' produced invalid outputs: {message}")]
    MissingOutput { task: String, message: String },

    /// Filesystem error from the cache store or sandbox plumbing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache manifest could not be serialized or parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl EngineError {
    /// Returns true for errors that the retry directive may re-dispatch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Execution { .. })
    }

    /// Returns true for the logic-error class (clean exit, bad outputs).
    pub fn is_logic_error(&self) -> bool {
        matches!(self, EngineError::MissingOutput { .. })
    }

    /// Returns true for fatal configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_is_retryable() {
        let err = EngineError::Execution {
            task: "align".to_string(),
            message: "exit code 1".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_logic_error());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_missing_output_is_logic_error() {
        let err = EngineError::MissingOutput {
            task: "align".to_string(),
            message: "pattern '*.bam' matched no files".to_string(),
        };
        assert!(err.is_logic_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_configuration_is_fatal() {
        let err = EngineError::Configuration("duplicate task name 'qc'".to_string());
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::Configuration("bad glob".to_string());
        assert_eq!(err.to_string(), "configuration error: bad glob");

        let err = EngineError::Execution {
            task: "trim".to_string(),
            message: "exit code 2".to_string(),
        };
        assert!(err.to_string().contains("trim"));
        assert!(err.to_string().contains("exit code 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(!err.is_retryable());
    }
}
