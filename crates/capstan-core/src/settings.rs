//! Per-torrent policy and its versioned on-disk document.
//!
//! [`TorrentSettings`] is the live policy a controller buffers and applies
//! whenever its torrent is attached. [`StoredTorrent`] is the JSON shape
//! written to the settings store, tagged with a schema version so older
//! documents decode into their original layout and migrate forward in
//! memory rather than failing the load.

use std::path::PathBuf;

use capstan_engine::{FilePriority, StorageMode, TrackerEntry};
use capstan_events::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live policy buffered on a controller.
///
/// Rate limits are kept in KiB per second with negative values meaning
/// unlimited; conversion to the engine's byte-per-second caps happens in
/// the accessor methods so every apply path agrees on the sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentSettings {
    /// Directory the payload is written to.
    pub save_directory: PathBuf,
    /// Directory the payload moves to once complete, when set.
    pub move_to_directory: Option<PathBuf>,
    /// Storage allocation mode, fixed at creation.
    pub storage_mode: StorageMode,
    /// Download cap in KiB per second, negative for unlimited.
    pub download_limit_kib: f64,
    /// Upload cap in KiB per second, negative for unlimited.
    pub upload_limit_kib: f64,
    /// Peer connection cap, negative for the engine default.
    pub connections: i32,
    /// Upload slot cap, negative for the engine default.
    pub uploads: i32,
    /// Stop-seeding ratio target, zero to seed indefinitely.
    pub ratio: f32,
    /// Whether peer country resolution is requested.
    pub resolve_countries: bool,
    /// Username sent on tracker announces, empty for none.
    pub tracker_username: String,
    /// Password sent on tracker announces.
    pub tracker_password: String,
    /// Custom tracker set, empty to keep the metainfo defaults.
    #[serde(default)]
    pub trackers: Vec<TrackerEntry>,
    /// Per-file priorities in metainfo order, empty for all-normal.
    #[serde(default)]
    pub file_priorities: Vec<FilePriority>,
}

impl TorrentSettings {
    /// Default policy writing into `save_directory`: unlimited rates,
    /// engine-default caps, seeding indefinitely.
    #[must_use]
    pub fn new(save_directory: PathBuf) -> Self {
        Self {
            save_directory,
            move_to_directory: None,
            storage_mode: StorageMode::default(),
            download_limit_kib: -1.0,
            upload_limit_kib: -1.0,
            connections: -1,
            uploads: -1,
            ratio: 0.0,
            resolve_countries: false,
            tracker_username: String::new(),
            tracker_password: String::new(),
            trackers: Vec::new(),
            file_priorities: Vec::new(),
        }
    }

    /// Download cap in bytes per second, `None` for unlimited.
    #[must_use]
    pub fn download_limit_bytes(&self) -> Option<i64> {
        rate_cap(self.download_limit_kib)
    }

    /// Upload cap in bytes per second, `None` for unlimited.
    #[must_use]
    pub fn upload_limit_bytes(&self) -> Option<i64> {
        rate_cap(self.upload_limit_kib)
    }

    /// Peer connection cap, `None` for the engine default.
    #[must_use]
    pub fn connection_cap(&self) -> Option<u32> {
        count_cap(self.connections)
    }

    /// Upload slot cap, `None` for the engine default.
    #[must_use]
    pub fn upload_slot_cap(&self) -> Option<u32> {
        count_cap(self.uploads)
    }
}

fn rate_cap(kib_per_sec: f64) -> Option<i64> {
    if kib_per_sec > 0.0 {
        Some((kib_per_sec * 1024.0) as i64)
    } else {
        None
    }
}

fn count_cap(count: i32) -> Option<u32> {
    u32::try_from(count).ok().filter(|cap| *cap > 0)
}

/// Versioned on-disk torrent document.
///
/// The `version` tag selects the layout; decoding never fails on an old
/// document, it decodes into the old shape and [`migrate`](Self::migrate)
/// maps it forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum StoredTorrent {
    /// The original single-directory layout with camel-case field names.
    #[serde(rename = "1")]
    V1(StoredTorrentV1),
    /// The current layout.
    #[serde(rename = "2")]
    V2(StoredTorrentV2),
}

impl StoredTorrent {
    /// Schema version of the document.
    #[must_use]
    pub const fn version(&self) -> u32 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => 2,
        }
    }

    /// Map the document forward to the current layout.
    ///
    /// Version 1 predates the move-to directory, so it defaults to the
    /// save directory, which the controller treats as no move. Payload
    /// counters and tracker overrides did not exist either and start
    /// empty; `now` stamps the migrated document.
    #[must_use]
    pub fn migrate(self, now: DateTime<Utc>) -> StoredTorrentV2 {
        match self {
            Self::V2(doc) => doc,
            Self::V1(doc) => StoredTorrentV2 {
                name: doc.name,
                filename: doc.filename,
                move_to_directory: Some(doc.save_directory.clone()),
                save_directory: doc.save_directory,
                allocation: if doc.compact_storage {
                    StorageMode::Compact
                } else {
                    StorageMode::Sparse
                },
                download_limit: doc.transfer_limit.0,
                upload_limit: doc.transfer_limit.1,
                connections: doc.connections,
                uploads: doc.uploads,
                ratio: doc.ratio,
                resolve_countries: false,
                tracker_username: doc.tracker_username,
                tracker_password: doc.tracker_password,
                trackers: Vec::new(),
                file_priorities: Vec::new(),
                state: doc.state,
                progress: doc.progress,
                downloaded: doc.downloaded,
                uploaded: doc.uploaded,
                payload_downloaded: 0,
                payload_uploaded: 0,
                active_duration: doc.active_duration,
                seeding_duration: doc.seeding_duration,
                start_time: doc.start_time,
                finish_time: doc.finish_time,
                saved_at: now,
            },
        }
    }
}

/// Legacy document layout, kept only so old installations load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTorrentV1 {
    /// Canonical display name.
    pub name: String,
    /// Storage filename of the archived descriptor.
    pub filename: String,
    /// Directory the payload was written to.
    pub save_directory: PathBuf,
    /// Download and upload caps in KiB per second, negative for unlimited.
    pub transfer_limit: (f64, f64),
    /// Peer connection cap, negative for the engine default.
    pub connections: i32,
    /// Upload slot cap, negative for the engine default.
    pub uploads: i32,
    /// Stop-seeding ratio target, zero to seed indefinitely.
    pub ratio: f32,
    /// Whether compact allocation was requested.
    pub compact_storage: bool,
    /// Username sent on tracker announces.
    pub tracker_username: String,
    /// Password sent on tracker announces.
    pub tracker_password: String,
    /// Lifecycle state at save time.
    pub state: LifecycleState,
    /// Completion fraction at save time.
    pub progress: f64,
    /// Lifetime bytes downloaded.
    pub downloaded: i64,
    /// Lifetime bytes uploaded.
    pub uploaded: i64,
    /// When the torrent first entered a session.
    pub start_time: Option<DateTime<Utc>>,
    /// When the payload first completed.
    pub finish_time: Option<DateTime<Utc>>,
    /// Lifetime active seconds.
    #[serde(default)]
    pub active_duration: i64,
    /// Lifetime seeding seconds.
    #[serde(default)]
    pub seeding_duration: i64,
}

/// Current document layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTorrentV2 {
    /// Canonical display name.
    pub name: String,
    /// Storage filename of the archived descriptor.
    pub filename: String,
    /// Directory the payload is written to.
    pub save_directory: PathBuf,
    /// Directory the payload moves to once complete, when set.
    pub move_to_directory: Option<PathBuf>,
    /// Storage allocation mode.
    pub allocation: StorageMode,
    /// Download cap in KiB per second, negative for unlimited.
    pub download_limit: f64,
    /// Upload cap in KiB per second, negative for unlimited.
    pub upload_limit: f64,
    /// Peer connection cap, negative for the engine default.
    pub connections: i32,
    /// Upload slot cap, negative for the engine default.
    pub uploads: i32,
    /// Stop-seeding ratio target, zero to seed indefinitely.
    pub ratio: f32,
    /// Whether peer country resolution is requested.
    pub resolve_countries: bool,
    /// Username sent on tracker announces.
    pub tracker_username: String,
    /// Password sent on tracker announces.
    pub tracker_password: String,
    /// Custom tracker set, empty to keep the metainfo defaults.
    #[serde(default)]
    pub trackers: Vec<TrackerEntry>,
    /// Per-file priorities in metainfo order, empty for all-normal.
    #[serde(default)]
    pub file_priorities: Vec<FilePriority>,
    /// Lifecycle state at save time.
    pub state: LifecycleState,
    /// Completion fraction at save time.
    pub progress: f64,
    /// Lifetime bytes downloaded, including protocol overhead.
    pub downloaded: i64,
    /// Lifetime bytes uploaded, including protocol overhead.
    pub uploaded: i64,
    /// Lifetime payload bytes downloaded.
    pub payload_downloaded: i64,
    /// Lifetime payload bytes uploaded.
    pub payload_uploaded: i64,
    /// Lifetime active seconds.
    pub active_duration: i64,
    /// Lifetime seeding seconds.
    pub seeding_duration: i64,
    /// When the torrent first entered a session.
    pub start_time: Option<DateTime<Utc>>,
    /// When the payload first completed.
    pub finish_time: Option<DateTime<Utc>>,
    /// When this document was written.
    pub saved_at: DateTime<Utc>,
}

impl From<&StoredTorrentV2> for TorrentSettings {
    fn from(doc: &StoredTorrentV2) -> Self {
        Self {
            save_directory: doc.save_directory.clone(),
            move_to_directory: doc.move_to_directory.clone(),
            storage_mode: doc.allocation,
            download_limit_kib: doc.download_limit,
            upload_limit_kib: doc.upload_limit,
            connections: doc.connections,
            uploads: doc.uploads,
            ratio: doc.ratio,
            resolve_countries: doc.resolve_countries,
            tracker_username: doc.tracker_username.clone(),
            tracker_password: doc.tracker_password.clone(),
            trackers: doc.trackers.clone(),
            file_priorities: doc.file_priorities.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_documents_migrate_forward() {
        let raw = r#"{
            "version": "1",
            "name": "alpha",
            "filename": "alpha.torrent",
            "saveDirectory": "/srv/payload",
            "transferLimit": [200.0, 100.0],
            "connections": 40,
            "uploads": 8,
            "ratio": 1.5,
            "compactStorage": true,
            "trackerUsername": "gull",
            "trackerPassword": "hush",
            "state": "paused",
            "progress": 0.25,
            "downloaded": 2048,
            "uploaded": 512,
            "startTime": "2026-01-15T10:00:00Z",
            "finishTime": null,
            "activeDuration": 90
        }"#;

        let document: StoredTorrent = serde_json::from_str(raw).expect("legacy decode");
        assert_eq!(document.version(), 1);

        let now = Utc::now();
        let migrated = document.migrate(now);
        assert_eq!(migrated.name, "alpha");
        assert_eq!(
            migrated.move_to_directory.as_deref(),
            Some(migrated.save_directory.as_path())
        );
        assert_eq!(migrated.allocation, StorageMode::Compact);
        assert!((migrated.download_limit - 200.0).abs() < f64::EPSILON);
        assert!((migrated.upload_limit - 100.0).abs() < f64::EPSILON);
        assert_eq!(migrated.payload_downloaded, 0);
        assert_eq!(migrated.active_duration, 90);
        assert_eq!(migrated.seeding_duration, 0);
        assert!(migrated.trackers.is_empty());
        assert_eq!(migrated.state, LifecycleState::Paused);
        assert_eq!(migrated.saved_at, now);
    }

    #[test]
    fn current_documents_round_trip() {
        let doc = sample_v2();
        let encoded = serde_json::to_string(&StoredTorrent::V2(doc.clone())).expect("encode");
        assert!(encoded.contains("\"version\":\"2\""));

        let decoded: StoredTorrent = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.migrate(Utc::now()), doc);
    }

    #[test]
    fn rate_caps_convert_to_bytes() {
        let mut settings = TorrentSettings::new(PathBuf::from("/srv/payload"));
        assert_eq!(settings.download_limit_bytes(), None);

        settings.download_limit_kib = 256.0;
        settings.upload_limit_kib = 0.5;
        assert_eq!(settings.download_limit_bytes(), Some(262_144));
        assert_eq!(settings.upload_limit_bytes(), Some(512));
    }

    #[test]
    fn count_caps_treat_nonpositive_as_default() {
        let mut settings = TorrentSettings::new(PathBuf::from("/srv/payload"));
        assert_eq!(settings.connection_cap(), None);

        settings.connections = 50;
        settings.uploads = 0;
        assert_eq!(settings.connection_cap(), Some(50));
        assert_eq!(settings.upload_slot_cap(), None);
    }

    fn sample_v2() -> StoredTorrentV2 {
        StoredTorrentV2 {
            name: "beta".into(),
            filename: "beta.torrent".into(),
            save_directory: PathBuf::from("/srv/payload"),
            move_to_directory: Some(PathBuf::from("/srv/library")),
            allocation: StorageMode::Sparse,
            download_limit: -1.0,
            upload_limit: 80.0,
            connections: -1,
            uploads: 4,
            ratio: 2.0,
            resolve_countries: true,
            tracker_username: String::new(),
            tracker_password: String::new(),
            trackers: vec![TrackerEntry {
                url: "http://tracker.example/announce".into(),
                tier: 0,
            }],
            file_priorities: vec![FilePriority::Skip, FilePriority::High],
            state: LifecycleState::Stopping,
            progress: 1.0,
            downloaded: 4_096,
            uploaded: 8_192,
            payload_downloaded: 4_000,
            payload_uploaded: 8_000,
            active_duration: 360,
            seeding_duration: 240,
            start_time: Some(Utc::now()),
            finish_time: None,
            saved_at: Utc::now(),
        }
    }
}
