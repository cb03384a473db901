#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

//! In-process torrent session simulator.
//!
//! The simulator models the behaviors the control layer depends on: handles
//! minted on attach, pause confirmations that arrive only through the alert
//! queue, resume blobs that round-trip progress, and lazy wall-clock progress
//! advancement. It performs no network or payload I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::metainfo::{self, TorrentMetadata};
use crate::session::EngineSession;
use crate::types::{
    Alert, AttachParams, EngineState, EngineStatus, FilePriority, PeerInfo, SessionHandle,
    TrackerEntry,
};

const DEFAULT_DOWNLOAD_RATE: f64 = 512.0 * 1024.0;

/// In-memory [`EngineSession`] implementation.
pub struct SimSession {
    state: Mutex<SimState>,
    download_rate: f64,
}

#[derive(Default)]
struct SimState {
    torrents: HashMap<SessionHandle, SimTorrent>,
    pending_alerts: Vec<Alert>,
    next_queue_position: i64,
}

struct SimTorrent {
    metainfo: Arc<TorrentMetadata>,
    save_path: PathBuf,
    paused: bool,
    progress: f64,
    finished_announced: bool,
    download_limit: Option<i64>,
    upload_limit: Option<i64>,
    max_connections: Option<u32>,
    trackers: Vec<TrackerEntry>,
    priorities: Vec<FilePriority>,
    resolve_countries: bool,
    total_payload_download: i64,
    total_payload_upload: i64,
    queue_position: i64,
    last_tick: DateTime<Utc>,
}

/// Engine-native resume payload; opaque to callers, JSON for the simulator.
#[derive(Serialize, Deserialize)]
struct ResumeBlob {
    info_hash: String,
    progress: f64,
    total_payload_download: i64,
    total_payload_upload: i64,
}

impl SimSession {
    /// Create a simulator with the default transfer rate.
    #[must_use]
    pub fn new() -> Self {
        Self::with_download_rate(DEFAULT_DOWNLOAD_RATE)
    }

    /// Create a simulator transferring at `bytes_per_second`.
    #[must_use]
    pub fn with_download_rate(bytes_per_second: f64) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            download_rate: bytes_per_second,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim session state poisoned")
    }

    fn advance(&self, state: &mut SimState, handle: SessionHandle) {
        let now = Utc::now();
        let Some(torrent) = state.torrents.get_mut(&handle) else {
            return;
        };
        let elapsed = (now - torrent.last_tick)
            .num_microseconds()
            .unwrap_or(0)
            .max(0) as f64
            / 1_000_000.0;
        torrent.last_tick = now;
        if torrent.paused {
            return;
        }

        let rate = torrent
            .download_limit
            .map_or(self.download_rate, |limit| {
                self.download_rate.min(limit as f64)
            })
            .max(0.0);
        let total = torrent.metainfo.total_size as f64;
        if torrent.progress < 1.0 {
            if total > 0.0 {
                torrent.progress = (torrent.progress + rate * elapsed / total).min(1.0);
            } else {
                torrent.progress = 1.0;
            }
            torrent.total_payload_download = (total * torrent.progress) as i64;
        }
        torrent.total_payload_upload += (rate * elapsed / 4.0) as i64;

        if torrent.progress >= 1.0 && !torrent.finished_announced {
            torrent.finished_announced = true;
            state.pending_alerts.push(Alert::TorrentFinished { handle });
        }
    }

    fn advance_all(&self, state: &mut SimState) {
        let handles: Vec<SessionHandle> = state.torrents.keys().copied().collect();
        for handle in handles {
            self.advance(state, handle);
        }
    }
}

impl Default for SimSession {
    fn default() -> Self {
        Self::new()
    }
}

fn torrent_mut(
    state: &mut SimState,
    handle: SessionHandle,
) -> EngineResult<(&mut SimTorrent, &mut Vec<Alert>)> {
    let SimState {
        torrents,
        pending_alerts,
        ..
    } = state;
    torrents
        .get_mut(&handle)
        .map(|torrent| (torrent, pending_alerts))
        .ok_or(EngineError::InvalidHandle { handle })
}

fn torrent_ref(state: &SimState, handle: SessionHandle) -> EngineResult<&SimTorrent> {
    state
        .torrents
        .get(&handle)
        .ok_or(EngineError::InvalidHandle { handle })
}

fn restore_from_blob(torrent: &mut SimTorrent, payload: &[u8]) -> Result<(), String> {
    let blob: ResumeBlob =
        serde_json::from_slice(payload).map_err(|err| format!("undecodable resume data: {err}"))?;
    if blob.info_hash != torrent.metainfo.info_hash_hex {
        return Err(format!(
            "resume data belongs to {}, torrent is {}",
            blob.info_hash, torrent.metainfo.info_hash_hex
        ));
    }
    torrent.progress = blob.progress.clamp(0.0, 1.0);
    torrent.finished_announced = torrent.progress >= 1.0;
    torrent.total_payload_download = blob.total_payload_download.max(0);
    torrent.total_payload_upload = blob.total_payload_upload.max(0);
    Ok(())
}

impl EngineSession for SimSession {
    fn attach(&self, params: AttachParams) -> EngineResult<SessionHandle> {
        let handle = SessionHandle::generate();
        let mut torrent = SimTorrent {
            trackers: params.metainfo.trackers.clone(),
            metainfo: params.metainfo,
            save_path: params.save_path,
            paused: params.start_paused,
            progress: 0.0,
            finished_announced: false,
            download_limit: None,
            upload_limit: None,
            max_connections: None,
            priorities: Vec::new(),
            resolve_countries: false,
            total_payload_download: 0,
            total_payload_upload: 0,
            queue_position: 0,
            last_tick: Utc::now(),
        };

        let mut rejected = None;
        if let Some(payload) = params.resume_data.as_deref()
            && let Err(detail) = restore_from_blob(&mut torrent, payload)
        {
            rejected = Some(detail);
        }

        let mut state = self.state();
        torrent.queue_position = state.next_queue_position;
        state.next_queue_position += 1;
        debug!(torrent = %torrent.metainfo.name, %handle, "torrent attached to sim session");
        state.torrents.insert(handle, torrent);
        if let Some(detail) = rejected {
            state.pending_alerts.push(Alert::EngineNotice {
                handle: Some(handle),
                message: detail,
            });
        }
        Ok(handle)
    }

    fn detach(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        let torrent = state
            .torrents
            .remove(&handle)
            .ok_or(EngineError::InvalidHandle { handle })?;
        debug!(torrent = %torrent.metainfo.name, %handle, "torrent detached from sim session");
        Ok(())
    }

    fn pause(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        self.advance(&mut state, handle);
        let (torrent, alerts) = torrent_mut(&mut state, handle)?;
        torrent.paused = true;
        // The engine re-confirms every request, even when already paused.
        alerts.push(Alert::TorrentPaused { handle });
        Ok(())
    }

    fn resume(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.paused = false;
        torrent.last_tick = Utc::now();
        Ok(())
    }

    fn is_paused(&self, handle: SessionHandle) -> EngineResult<bool> {
        let state = self.state();
        torrent_ref(&state, handle).map(|torrent| torrent.paused)
    }

    fn status(&self, handle: SessionHandle) -> EngineResult<EngineStatus> {
        let mut state = self.state();
        self.advance(&mut state, handle);
        let torrent = torrent_ref(&state, handle)?;

        let jitter = rand::rng().random_range(0.92..1.08);
        let base_rate = if torrent.paused {
            0.0
        } else {
            torrent
                .download_limit
                .map_or(self.download_rate, |limit| {
                    self.download_rate.min(limit as f64)
                })
                .max(0.0)
                * jitter
        };
        let upload_rate = torrent
            .upload_limit
            .map_or(base_rate / 4.0, |limit| (base_rate / 4.0).min(limit as f64));

        let wanted: i64 = torrent
            .metainfo
            .files
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                torrent.priorities.get(*index).copied().unwrap_or_default() != FilePriority::Skip
            })
            .map(|(_, file)| file.length as i64)
            .sum();

        Ok(EngineStatus {
            progress: torrent.progress,
            state: if torrent.progress >= 1.0 {
                EngineState::Seeding
            } else {
                EngineState::Downloading
            },
            paused: torrent.paused,
            download_rate: base_rate,
            upload_rate,
            download_payload_rate: base_rate,
            upload_payload_rate: upload_rate,
            total_download: torrent.total_payload_download + torrent.total_payload_download / 50,
            total_upload: torrent.total_payload_upload + torrent.total_payload_upload / 50,
            total_payload_download: torrent.total_payload_download,
            total_payload_upload: torrent.total_payload_upload,
            total_wanted: wanted,
            total_wanted_done: (wanted as f64 * torrent.progress) as i64,
            next_announce: if torrent.paused {
                None
            } else {
                Some(chrono::Duration::seconds(1800))
            },
            distributed_copies: if torrent.paused {
                -1.0
            } else {
                1.0 + torrent.progress
            },
            queue_position: torrent.queue_position,
            current_tracker: torrent
                .trackers
                .first()
                .map(|entry| entry.url.clone())
                .unwrap_or_default(),
        })
    }

    fn peer_info(&self, handle: SessionHandle) -> EngineResult<Vec<PeerInfo>> {
        let mut state = self.state();
        self.advance(&mut state, handle);
        let torrent = torrent_ref(&state, handle)?;
        if torrent.paused {
            return Ok(Vec::new());
        }

        let count = torrent.max_connections.map_or(4, |limit| limit.min(4));
        let per_peer = self.download_rate / f64::from(count.max(1));
        Ok((0..count)
            .map(|index| PeerInfo {
                address: format!("198.51.100.{}:{}", 10 + index, 6881 + index),
                client: "capstan-sim/1.0".to_string(),
                download_rate: per_peer,
                upload_rate: per_peer / 4.0,
                seed: index % 2 == 0,
                country: if torrent.resolve_countries {
                    "SE".to_string()
                } else {
                    String::new()
                },
            })
            .collect())
    }

    fn file_progress(&self, handle: SessionHandle) -> EngineResult<Vec<u64>> {
        let mut state = self.state();
        self.advance(&mut state, handle);
        let torrent = torrent_ref(&state, handle)?;
        Ok(torrent
            .metainfo
            .files
            .iter()
            .map(|file| (file.length as f64 * torrent.progress) as u64)
            .collect())
    }

    fn set_download_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.download_limit = limit;
        Ok(())
    }

    fn set_upload_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.upload_limit = limit;
        Ok(())
    }

    fn set_max_connections(&self, handle: SessionHandle, limit: Option<u32>) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.max_connections = limit;
        Ok(())
    }

    fn set_max_uploads(&self, handle: SessionHandle, _limit: Option<u32>) -> EngineResult<()> {
        let state = self.state();
        torrent_ref(&state, handle).map(|_| ())
    }

    fn set_ratio(&self, handle: SessionHandle, _ratio: f32) -> EngineResult<()> {
        let state = self.state();
        torrent_ref(&state, handle).map(|_| ())
    }

    fn set_tracker_login(
        &self,
        handle: SessionHandle,
        _username: &str,
        _password: &str,
    ) -> EngineResult<()> {
        let state = self.state();
        torrent_ref(&state, handle).map(|_| ())
    }

    fn replace_trackers(
        &self,
        handle: SessionHandle,
        trackers: &[TrackerEntry],
    ) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.trackers = trackers.to_vec();
        Ok(())
    }

    fn trackers(&self, handle: SessionHandle) -> EngineResult<Vec<TrackerEntry>> {
        let state = self.state();
        torrent_ref(&state, handle).map(|torrent| torrent.trackers.clone())
    }

    fn prioritize_files(
        &self,
        handle: SessionHandle,
        priorities: &[FilePriority],
    ) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.priorities = priorities.to_vec();
        Ok(())
    }

    fn resolve_countries(&self, handle: SessionHandle, enabled: bool) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, _) = torrent_mut(&mut state, handle)?;
        torrent.resolve_countries = enabled;
        Ok(())
    }

    fn save_resume_data(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        self.advance(&mut state, handle);
        let (torrent, alerts) = torrent_mut(&mut state, handle)?;
        let blob = ResumeBlob {
            info_hash: torrent.metainfo.info_hash_hex.clone(),
            progress: torrent.progress,
            total_payload_download: torrent.total_payload_download,
            total_payload_upload: torrent.total_payload_upload,
        };
        match serde_json::to_vec(&blob) {
            Ok(payload) => alerts.push(Alert::ResumeDataSaved { handle, payload }),
            Err(err) => alerts.push(Alert::ResumeDataFailed {
                handle,
                message: err.to_string(),
            }),
        }
        Ok(())
    }

    fn move_storage(&self, handle: SessionHandle, path: &Path) -> EngineResult<()> {
        let mut state = self.state();
        let (torrent, alerts) = torrent_mut(&mut state, handle)?;
        let previous = std::mem::replace(&mut torrent.save_path, path.to_path_buf());
        alerts.push(Alert::EngineNotice {
            handle: Some(handle),
            message: format!(
                "storage moved from '{}' to '{}'",
                previous.display(),
                path.display()
            ),
        });
        Ok(())
    }

    fn load_metainfo(&self, path: &Path) -> EngineResult<Arc<TorrentMetadata>> {
        metainfo::load(path).map(Arc::new)
    }

    fn poll_alerts(&self) -> Vec<Alert> {
        let mut state = self.state();
        self.advance_all(&mut state);
        std::mem::take(&mut state.pending_alerts)
    }
}
