#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Engine-session boundary for the Capstan control layer.
//!
//! The torrent engine proper (peer wire, piece picking, disk I/O) sits behind
//! the [`EngineSession`] trait: a synchronous command surface plus an
//! asynchronous alert queue drained through [`EngineSession::poll_alerts`].
//! [`SimSession`] provides the in-process implementation used by the service
//! and by tests.

/// Typed errors surfaced at the engine boundary.
pub mod error;
/// Torrent descriptor decoding.
pub mod metainfo;
/// Session trait and the in-memory simulator.
pub mod session;
/// Request, status, and alert types shared with session implementations.
pub mod types;

pub use error::{EngineError, EngineResult};
pub use metainfo::{MetainfoFile, TorrentMetadata};
pub use session::{EngineSession, SimSession};
pub use types::{
    Alert, AttachParams, EngineState, EngineStatus, FilePriority, PeerInfo, SessionHandle,
    StorageMode, TrackerEntry,
};
