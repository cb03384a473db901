//! Session abstraction over the torrent engine.

use std::path::Path;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::metainfo::TorrentMetadata;
use crate::types::{
    Alert, AttachParams, EngineStatus, FilePriority, PeerInfo, SessionHandle, TrackerEntry,
};

mod sim;

pub use sim::SimSession;

/// Synchronous command surface of the torrent engine.
///
/// Pause requests and resume-data flushes complete asynchronously: the
/// synchronous return only acknowledges the request, and the confirmation
/// arrives later through [`EngineSession::poll_alerts`]. Implementations may
/// deliver more alerts than were requested; callers are expected to handle
/// duplicates idempotently.
pub trait EngineSession: Send + Sync {
    /// Attach a torrent to the session and mint a handle for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session rejects the torrent.
    fn attach(&self, params: AttachParams) -> EngineResult<SessionHandle>;

    /// Remove a torrent from the session, invalidating its handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn detach(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Request a pause; confirmation arrives as [`Alert::TorrentPaused`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn pause(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Resume a paused torrent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn resume(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Whether the engine currently holds the torrent paused.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn is_paused(&self, handle: SessionHandle) -> EngineResult<bool>;

    /// Point-in-time status for the torrent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn status(&self, handle: SessionHandle) -> EngineResult<EngineStatus>;

    /// Connected peers for the torrent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn peer_info(&self, handle: SessionHandle) -> EngineResult<Vec<PeerInfo>>;

    /// Bytes completed per payload file, in metainfo order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn file_progress(&self, handle: SessionHandle) -> EngineResult<Vec<u64>>;

    /// Cap the download rate in bytes per second; `None` lifts the cap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_download_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()>;

    /// Cap the upload rate in bytes per second; `None` lifts the cap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_upload_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()>;

    /// Cap concurrent peer connections; `None` lifts the cap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_max_connections(&self, handle: SessionHandle, limit: Option<u32>) -> EngineResult<()>;

    /// Cap concurrent upload slots; `None` lifts the cap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_max_uploads(&self, handle: SessionHandle, limit: Option<u32>) -> EngineResult<()>;

    /// Set the stop-seeding ratio target.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_ratio(&self, handle: SessionHandle, ratio: f32) -> EngineResult<()>;

    /// Supply credentials used on tracker announces.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn set_tracker_login(
        &self,
        handle: SessionHandle,
        username: &str,
        password: &str,
    ) -> EngineResult<()>;

    /// Replace the torrent's announce set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn replace_trackers(
        &self,
        handle: SessionHandle,
        trackers: &[TrackerEntry],
    ) -> EngineResult<()>;

    /// The torrent's current announce set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn trackers(&self, handle: SessionHandle) -> EngineResult<Vec<TrackerEntry>>;

    /// Set per-file priorities, in metainfo order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn prioritize_files(
        &self,
        handle: SessionHandle,
        priorities: &[FilePriority],
    ) -> EngineResult<()>;

    /// Toggle country resolution for peer listings.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn resolve_countries(&self, handle: SessionHandle, enabled: bool) -> EngineResult<()>;

    /// Request a resume-data flush; completion arrives as
    /// [`Alert::ResumeDataSaved`] or [`Alert::ResumeDataFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn save_resume_data(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Relocate the torrent's payload storage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::InvalidHandle`] if the handle is unknown.
    fn move_storage(&self, handle: SessionHandle, path: &Path) -> EngineResult<()>;

    /// Decode a torrent descriptor using the engine's parser.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not decode.
    fn load_metainfo(&self, path: &Path) -> EngineResult<Arc<TorrentMetadata>>;

    /// Drain all queued alerts.
    fn poll_alerts(&self) -> Vec<Alert>;
}
