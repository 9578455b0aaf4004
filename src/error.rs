//! Error taxonomy for the intake pipeline.
//!
//! Each external concern gets its own enum so callers can tell recoverable
//! per-file failures ([`ValidationError`], [`CollectorError`], [`SyncError`])
//! apart from process-level ones ([`IntakeError`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("another instance is running (pid {pid})")]
    LockHeld { pid: u32 },

    #[error("SR number not found: {0}")]
    NotFound(String),

    #[error("invalid SR number '{0}': expected exactly 9 digits")]
    InvalidSrNumber(String),

    #[error("failed to archive {path}: {source}")]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state transition: {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a work-order file was rejected. Reported one at a time, first failing
/// rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected 3 fields, found {found}")]
    FieldCount { found: usize },

    #[error("SR number '{value}' is not exactly 9 digits")]
    SrFormat { value: String },

    #[error("hostname is empty")]
    EmptyHostname,

    #[error("token is empty")]
    EmptyToken,

    #[error("file is unreadable: {0}")]
    Unreadable(String),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    /// No executable found on PATH, in the user-local bin dir or the working directory.
    #[error("collector tool '{tool}' not found")]
    ToolNotFound { tool: String },

    #[error("failed to start collector: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("collector exited with {}", exit_label(.code))]
    NonZeroExit { code: Option<i32> },

    #[error("collector failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<CollectorError>,
    },
}

impl CollectorError {
    /// Only execution failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::NonZeroExit { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolNotFound { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("git {args} failed ({status}): {stderr}")]
    Command {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        last: Box<SyncError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_held_display() {
        let err = IntakeError::LockHeld { pid: 4242 };
        assert_eq!(err.to_string(), "another instance is running (pid 4242)");
    }

    #[test]
    fn non_zero_exit_display() {
        let err = CollectorError::NonZeroExit { code: Some(2) };
        assert_eq!(err.to_string(), "collector exited with exit code 2");

        let err = CollectorError::NonZeroExit { code: None };
        assert_eq!(
            err.to_string(),
            "collector exited with no exit code (terminated by signal)"
        );
    }

    #[test]
    fn tool_not_found_is_fatal_and_not_retryable() {
        let err = CollectorError::ToolNotFound {
            tool: "lc-collector".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(CollectorError::NonZeroExit { code: Some(1) }.is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IntakeError>();
        assert_send_sync::<SyncError>();
    }
}
