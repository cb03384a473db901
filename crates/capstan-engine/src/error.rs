//! Error types for the engine session boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SessionHandle;

/// Primary error type for engine session operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The handle does not refer to a torrent attached to the session.
    #[error("invalid session handle {handle}")]
    InvalidHandle {
        /// Handle presented by the caller.
        handle: SessionHandle,
    },
    /// A torrent descriptor could not be decoded.
    #[error("metainfo rejected: {detail}")]
    Metainfo {
        /// Decoder diagnostic.
        detail: String,
    },
    /// A filesystem operation on behalf of the session failed.
    #[error("engine i/o failure during {operation} on '{}'", path.display())]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The session rejected or failed an otherwise well-formed request.
    #[error("engine operation {operation} failed: {detail}")]
    Failure {
        /// Operation identifier.
        operation: &'static str,
        /// Engine diagnostic.
        detail: String,
    },
}

/// Convenience alias for engine operation results.
pub type EngineResult<T> = Result<T, EngineError>;
