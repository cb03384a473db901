//! Error types for lookup, persistence, and bootstrap failures.
//!
//! Lifecycle commands on a live controller never return these; engine
//! faults inside those paths are absorbed and reported as events. The
//! errors here cover the operations that have a caller who can act on the
//! failure: registry lookups, adding a torrent, and reading or writing the
//! on-disk stores.

use std::path::PathBuf;

use capstan_engine::EngineError;
use thiserror::Error;

/// Failures surfaced by the control layer.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No live torrent matched the given name or filename.
    #[error("no torrent matches '{identifier}'")]
    InvalidTorrent {
        /// The name or filename that failed to resolve.
        identifier: String,
    },

    /// A torrent with the same name or filename is already registered.
    #[error("torrent '{name}' ({filename}) is already registered")]
    DuplicateTorrent {
        /// Display name of the conflicting torrent.
        name: String,
        /// Storage filename of the conflicting torrent.
        filename: String,
    },

    /// The engine rejected an operation during bootstrap.
    #[error("engine rejected {operation}")]
    Engine {
        /// The operation being attempted.
        operation: &'static str,
        /// The underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// A filesystem operation on one of the stores failed.
    #[error("i/o failure during {operation} on '{}'", path.display())]
    Io {
        /// The operation being attempted.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying i/o failure.
        #[source]
        source: std::io::Error,
    },

    /// A persisted torrent document could not be encoded or decoded.
    #[error("malformed torrent document during {operation} on '{}'", path.display())]
    Document {
        /// The operation being attempted.
        operation: &'static str,
        /// The document path involved.
        path: PathBuf,
        /// The underlying serialization failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for control-layer operations.
pub type ControlResult<T> = Result<T, ControlError>;
