//! Unified error handling for nodegate.
//!
//! Each layer of the admission pipeline has its own error enum. Errors that
//! surface per connection carry a static `error_code()` used as a metric
//! label; none of them is allowed to take the daemon down.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Persistence Errors (ban state, deny-list appends)
// ============================================================================

/// Failure to read or write on-disk admission state.
///
/// In-memory state stays authoritative when these occur.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed state in {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ============================================================================
// Listener Errors (accept loop)
// ============================================================================

/// Errors that end the accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener {label} failed: {source}")]
    Multiplexer {
        label: String,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Launch Errors (worker spawn and relay)
// ============================================================================

/// Errors handing a connection to a worker.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command template expanded to an empty command line")]
    EmptyCommand,

    #[error("cannot parse command line '{command}': {source}")]
    InvalidCommand {
        command: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("cannot prepare socket for handoff: {0}")]
    Handoff(#[source] io::Error),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for worker: {0}")]
    Wait(#[source] io::Error),

    #[error("cannot reach relay target {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::Handoff(_) => "handoff",
            Self::Spawn { .. } => "spawn",
            Self::Wait(_) => "wait",
            Self::Connect { .. } => "connect",
        }
    }
}

// ============================================================================
// Dispatch Errors (per-connection state machine)
// ============================================================================

/// Errors that end one dispatched connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connection i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("no service configured for {0} connections")]
    NoService(&'static str),
}

impl DispatchError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Launch(e) => e.error_code(),
            Self::NoService(_) => "no_service",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_codes() {
        let io_err = DispatchError::from(io::Error::other("boom"));
        assert_eq!(io_err.error_code(), "io");

        let launch = DispatchError::from(LaunchError::EmptyCommand);
        assert_eq!(launch.error_code(), "empty_command");
        assert_eq!(launch.to_string(), LaunchError::EmptyCommand.to_string());

        assert_eq!(DispatchError::NoService("ssh").error_code(), "no_service");
    }

    #[test]
    fn test_persistence_error_mentions_path() {
        let err = PersistenceError::io("/data/autoblock.json", io::Error::other("disk full"));
        let text = err.to_string();
        assert!(text.contains("/data/autoblock.json"));
        assert!(text.contains("disk full"));
    }
}
