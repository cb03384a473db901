//! Request, status, and alert types exchanged with a session implementation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metainfo::TorrentMetadata;

/// Opaque identifier for a torrent attached to a session.
///
/// Handles are minted by [`crate::EngineSession::attach`] and become
/// meaningless once the torrent detaches; callers must not persist them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    /// Mint a fresh handle.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Disk allocation strategy, chosen once when a torrent first attaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Pre-allocate every file up front.
    Full,
    /// Legacy compact allocation.
    Compact,
    /// Sparse files, allocated as pieces arrive.
    #[default]
    Sparse,
}

/// Parameters for attaching a torrent to the session.
#[derive(Debug, Clone)]
pub struct AttachParams {
    /// Decoded descriptor for the torrent.
    pub metainfo: Arc<TorrentMetadata>,
    /// Directory payload data is written to.
    pub save_path: PathBuf,
    /// Allocation strategy for payload files.
    pub storage_mode: StorageMode,
    /// Whether the torrent should be attached in a paused state.
    pub start_paused: bool,
    /// Engine-native resume blob from a previous run, when one exists.
    pub resume_data: Option<Vec<u8>>,
}

/// Engine-reported activity for an attached torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Waiting for a checking slot.
    #[default]
    QueuedForChecking,
    /// Verifying previously downloaded payload.
    CheckingFiles,
    /// Fetching metadata from the swarm.
    DownloadingMetadata,
    /// Transferring payload.
    Downloading,
    /// All wanted pieces complete, not yet seeding.
    Finished,
    /// Complete and uploading to peers.
    Seeding,
    /// Allocating payload files on disk.
    Allocating,
}

/// Point-in-time status for an attached torrent.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Engine activity.
    pub state: EngineState,
    /// Whether the engine currently holds the torrent paused.
    pub paused: bool,
    /// Download rate in bytes per second, all traffic.
    pub download_rate: f64,
    /// Upload rate in bytes per second, all traffic.
    pub upload_rate: f64,
    /// Download rate in bytes per second, payload only.
    pub download_payload_rate: f64,
    /// Upload rate in bytes per second, payload only.
    pub upload_payload_rate: f64,
    /// Cumulative bytes downloaded since this attach.
    pub total_download: i64,
    /// Cumulative bytes uploaded since this attach.
    pub total_upload: i64,
    /// Cumulative payload bytes downloaded since this attach.
    pub total_payload_download: i64,
    /// Cumulative payload bytes uploaded since this attach.
    pub total_payload_upload: i64,
    /// Bytes wanted by the current file selection.
    pub total_wanted: i64,
    /// Wanted bytes already downloaded.
    pub total_wanted_done: i64,
    /// Time until the next tracker announce, when scheduled.
    pub next_announce: Option<chrono::Duration>,
    /// Swarm health estimate; negative when unknown.
    pub distributed_copies: f64,
    /// Position in the engine's activity queue.
    pub queue_position: i64,
    /// Tracker the torrent last announced to.
    pub current_tracker: String,
}

/// One connected peer, as reported by the session.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote address in `ip:port` form.
    pub address: String,
    /// Peer client identification string.
    pub client: String,
    /// Download rate from this peer in bytes per second.
    pub download_rate: f64,
    /// Upload rate to this peer in bytes per second.
    pub upload_rate: f64,
    /// Whether the peer is a seed.
    pub seed: bool,
    /// Two-letter country code when resolution is enabled, else empty.
    pub country: String,
}

/// One tracker announce target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerEntry {
    /// Announce URL.
    pub url: String,
    /// Tier the tracker belongs to; lower tiers are tried first.
    pub tier: u32,
}

/// Per-file download priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePriority {
    /// Do not download the file.
    Skip,
    /// Below-normal priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Above-normal priority.
    High,
}

/// Asynchronous notification drained from the session alert queue.
#[derive(Debug, Clone)]
pub enum Alert {
    /// The engine confirmed a pause request for the torrent.
    TorrentPaused {
        /// Torrent the confirmation applies to.
        handle: SessionHandle,
    },
    /// The torrent finished downloading all wanted pieces.
    TorrentFinished {
        /// Torrent that finished.
        handle: SessionHandle,
    },
    /// A requested resume-data flush completed.
    ResumeDataSaved {
        /// Torrent the blob belongs to.
        handle: SessionHandle,
        /// Engine-native resume blob.
        payload: Vec<u8>,
    },
    /// A requested resume-data flush failed.
    ResumeDataFailed {
        /// Torrent the request applied to.
        handle: SessionHandle,
        /// Engine diagnostic.
        message: String,
    },
    /// Informational notice not tied to a specific request.
    EngineNotice {
        /// Torrent the notice concerns, when known.
        handle: Option<SessionHandle>,
        /// Notice text.
        message: String,
    },
}

impl Alert {
    /// Handle the alert correlates with, when one is known.
    #[must_use]
    pub const fn handle(&self) -> Option<SessionHandle> {
        match self {
            Self::TorrentPaused { handle }
            | Self::TorrentFinished { handle }
            | Self::ResumeDataSaved { handle, .. }
            | Self::ResumeDataFailed { handle, .. } => Some(*handle),
            Self::EngineNotice { handle, .. } => *handle,
        }
    }

    /// Machine-readable discriminator used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentPaused { .. } => "torrent_paused",
            Self::TorrentFinished { .. } => "torrent_finished",
            Self::ResumeDataSaved { .. } => "resume_data_saved",
            Self::ResumeDataFailed { .. } => "resume_data_failed",
            Self::EngineNotice { .. } => "engine_notice",
        }
    }
}
