//! Snapshot DTOs handed to display surfaces.
//!
//! A [`TorrentDetails`] is produced on every refresh pass and carries
//! everything a status row needs. Snapshots are self-contained: once
//! built they borrow nothing from the controller, so display code can
//! hold them across refreshes.

use std::path::PathBuf;

use capstan_engine::{EngineState, FilePriority, PeerInfo};
use capstan_events::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Peer population counts derived from the last known peer list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCounts {
    /// Peers known for the torrent.
    pub peers: usize,
    /// Peers with an open connection.
    pub peers_connected: usize,
    /// Known peers holding the complete payload.
    pub seeds: usize,
    /// Connected peers holding the complete payload.
    pub seeds_connected: usize,
}

impl PeerCounts {
    /// Tally counts from a connected-peer list.
    #[must_use]
    pub fn tally(peers: &[PeerInfo]) -> Self {
        let seeds = peers.iter().filter(|peer| peer.seed).count();
        Self {
            peers: peers.len(),
            peers_connected: peers.len(),
            seeds,
            seeds_connected: seeds,
        }
    }
}

/// One connected peer, as last reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerDetail {
    /// Remote address in `host:port` form.
    pub address: String,
    /// Client identification string, when known.
    pub client: String,
    /// Download rate from this peer in bytes per second.
    pub download_rate: f64,
    /// Upload rate to this peer in bytes per second.
    pub upload_rate: f64,
    /// Whether the peer holds the complete payload.
    pub seed: bool,
    /// Two-letter country code, when resolution is enabled.
    pub country: String,
}

impl From<&PeerInfo> for PeerDetail {
    fn from(peer: &PeerInfo) -> Self {
        Self {
            address: peer.address.clone(),
            client: peer.client.clone(),
            download_rate: peer.download_rate,
            upload_rate: peer.upload_rate,
            seed: peer.seed,
            country: peer.country.clone(),
        }
    }
}

/// Completion and priority for one payload file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDetail {
    /// Path of the file relative to the save directory.
    pub path: PathBuf,
    /// Total size of the file in bytes.
    pub size: u64,
    /// Bytes of the file completed so far.
    pub completed: u64,
    /// Download priority applied to the file.
    pub priority: FilePriority,
    /// Position of the file in metainfo order.
    pub index: usize,
}

impl FileDetail {
    /// Completion of this file as a fraction in `0.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            1.0
        } else {
            (self.completed as f64 / self.size as f64).min(1.0)
        }
    }
}

/// Point-in-time snapshot of one torrent.
///
/// Built from live engine status while attached; falls back to the last
/// persisted statistics when the torrent is detached or the engine
/// refuses the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentDetails {
    /// Canonical display name.
    pub name: String,
    /// Storage filename of the archived descriptor.
    pub filename: String,
    /// Directory the payload is written to.
    pub save_directory: PathBuf,
    /// Control-layer lifecycle state.
    pub state: LifecycleState,
    /// Engine-side activity, when attached.
    pub activity: Option<EngineState>,
    /// Overall completion as a fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Download rate in bytes per second.
    pub download_rate: f64,
    /// Upload rate in bytes per second.
    pub upload_rate: f64,
    /// Engine queue position, when attached.
    pub queue_position: Option<i64>,
    /// Distributed copies of the rarest piece set, `-1.0` when unknown.
    pub distributed_copies: f64,
    /// Bytes wanted under the current file priorities.
    pub total_wanted: i64,
    /// Bytes wanted and already completed.
    pub total_wanted_done: i64,
    /// Lifetime bytes downloaded, including protocol overhead.
    pub downloaded: i64,
    /// Lifetime bytes uploaded, including protocol overhead.
    pub uploaded: i64,
    /// Lifetime payload bytes downloaded.
    pub payload_downloaded: i64,
    /// Lifetime payload bytes uploaded.
    pub payload_uploaded: i64,
    /// Peer population summary.
    pub peers: PeerCounts,
    /// Achieved share ratio, payload uploaded over payload downloaded.
    pub ratio: f32,
    /// Estimated seconds until completion, when downloading.
    pub eta_seconds: Option<i64>,
    /// Seconds until the next tracker announce, when attached.
    pub next_announce_seconds: Option<i64>,
    /// Lifetime seconds spent unpaused in a session.
    pub active_duration_seconds: i64,
    /// Lifetime seconds spent seeding.
    pub seeding_duration_seconds: i64,
    /// When the torrent first entered a session.
    pub start_time: Option<DateTime<Utc>>,
    /// When the payload first completed.
    pub finish_time: Option<DateTime<Utc>>,
    /// Tracker the engine most recently announced to.
    pub current_tracker: String,
}

impl TorrentDetails {
    /// Stable label resolving lifecycle and engine activity for display.
    ///
    /// Transient and resting lifecycle states take precedence; engine
    /// activity refines the label only while the torrent runs.
    #[must_use]
    pub fn display_status(&self) -> &'static str {
        match self.state {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Paused => "paused",
            LifecycleState::Pausing => "pausing",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Active => match self.activity {
                None => "active",
                Some(EngineState::QueuedForChecking) => "queued",
                Some(EngineState::CheckingFiles) => "checking files",
                Some(EngineState::DownloadingMetadata) => "downloading metadata",
                Some(EngineState::Downloading) => "downloading",
                Some(EngineState::Finished) => "finished",
                Some(EngineState::Seeding) => "seeding",
                Some(EngineState::Allocating) => "allocating",
            },
        }
    }

    /// Overall completion as a percentage in `0.0..=100.0`.
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        (self.progress * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_status_prefers_lifecycle_over_activity() {
        let mut details = sample_details();
        details.state = LifecycleState::Pausing;
        details.activity = Some(EngineState::Seeding);
        assert_eq!(details.display_status(), "pausing");

        details.state = LifecycleState::Active;
        assert_eq!(details.display_status(), "seeding");

        details.activity = None;
        assert_eq!(details.display_status(), "active");
    }

    #[test]
    fn peer_counts_tally_seeds() {
        let peers = vec![
            PeerInfo {
                address: "198.51.100.1:6881".into(),
                client: "client/1".into(),
                download_rate: 10.0,
                upload_rate: 5.0,
                seed: true,
                country: String::new(),
            },
            PeerInfo {
                address: "198.51.100.2:6881".into(),
                client: "client/2".into(),
                download_rate: 0.0,
                upload_rate: 0.0,
                seed: false,
                country: String::new(),
            },
        ];
        let counts = PeerCounts::tally(&peers);
        assert_eq!(counts.peers_connected, 2);
        assert_eq!(counts.seeds_connected, 1);
    }

    #[test]
    fn empty_files_count_as_complete() {
        let file = FileDetail {
            path: PathBuf::from("payload/readme"),
            size: 0,
            completed: 0,
            priority: FilePriority::Normal,
            index: 0,
        };
        assert!((file.progress() - 1.0).abs() < f64::EPSILON);
    }

    fn sample_details() -> TorrentDetails {
        TorrentDetails {
            name: "alpha".into(),
            filename: "alpha.torrent".into(),
            save_directory: PathBuf::from("/srv/payload"),
            state: LifecycleState::Active,
            activity: Some(EngineState::Downloading),
            progress: 0.5,
            total_size: 100,
            download_rate: 0.0,
            upload_rate: 0.0,
            queue_position: Some(0),
            distributed_copies: -1.0,
            total_wanted: 100,
            total_wanted_done: 50,
            downloaded: 50,
            uploaded: 10,
            payload_downloaded: 48,
            payload_uploaded: 9,
            peers: PeerCounts::default(),
            ratio: 0.0,
            eta_seconds: None,
            next_announce_seconds: None,
            active_duration_seconds: 0,
            seeding_duration_seconds: 0,
            start_time: None,
            finish_time: None,
            current_tracker: String::new(),
        }
    }
}
