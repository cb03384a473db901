//! Scripted engine-session double.
//!
//! [`RecordingSession`] keeps a transcript of every command the code under
//! test issues and plays back only the alerts a test injects. Unlike the
//! real engine it never confirms anything on its own, so confirmation
//! ordering stays entirely under test control.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use capstan_engine::metainfo;
use capstan_engine::{
    Alert, AttachParams, EngineError, EngineResult, EngineSession, EngineStatus, FilePriority,
    PeerInfo, SessionHandle, TorrentMetadata, TrackerEntry,
};

/// One recorded engine command, in issue order.
///
/// Queries (`status`, `peer_info`, and friends) are not recorded; the
/// transcript holds the mutating surface only.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    /// A torrent attached to the session.
    Attach {
        /// Name from the descriptor metadata.
        name: String,
        /// Whether the torrent attached in a held state.
        start_paused: bool,
        /// Whether a resume blob accompanied the attach.
        with_resume: bool,
    },
    /// The torrent left the session.
    Detach(SessionHandle),
    /// A pause was requested.
    Pause(SessionHandle),
    /// A resume was requested.
    Resume(SessionHandle),
    /// Download cap change, bytes per second.
    DownloadLimit(SessionHandle, Option<i64>),
    /// Upload cap change, bytes per second.
    UploadLimit(SessionHandle, Option<i64>),
    /// Connection cap change.
    MaxConnections(SessionHandle, Option<u32>),
    /// Upload-slot cap change.
    MaxUploads(SessionHandle, Option<u32>),
    /// Stop-seeding ratio change.
    Ratio(SessionHandle, f32),
    /// Tracker credentials change; records the username.
    TrackerLogin(SessionHandle, String),
    /// Tracker set replacement; records how many entries were sent.
    ReplaceTrackers(SessionHandle, usize),
    /// File priority update; records how many priorities were sent.
    PrioritizeFiles(SessionHandle, usize),
    /// Peer country resolution toggle.
    ResolveCountries(SessionHandle, bool),
    /// A resume-data flush was requested.
    SaveResumeData(SessionHandle),
    /// Payload storage relocation.
    MoveStorage(SessionHandle, PathBuf),
}

#[derive(Default)]
struct MockState {
    torrents: HashMap<SessionHandle, MockTorrent>,
    calls: Vec<SessionCall>,
    alerts: VecDeque<Alert>,
    fail_attach: Option<String>,
}

struct MockTorrent {
    paused: bool,
    status: Option<EngineStatus>,
    peers: Vec<PeerInfo>,
    file_progress: Vec<u64>,
    trackers: Vec<TrackerEntry>,
}

/// In-memory [`EngineSession`] that records commands and replays scripted
/// responses.
#[derive(Default)]
pub struct RecordingSession {
    state: Mutex<MockState>,
}

impl RecordingSession {
    /// An empty session with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an alert for the next [`EngineSession::poll_alerts`] drain.
    pub fn push_alert(&self, alert: Alert) {
        self.state().alerts.push_back(alert);
    }

    /// Make the next attach fail with the given diagnostic.
    pub fn fail_next_attach(&self, detail: &str) {
        self.state().fail_attach = Some(detail.to_owned());
    }

    /// Script the status reported for an attached torrent.
    ///
    /// The session's own pause flag overrides the scripted `paused` field.
    ///
    /// # Panics
    ///
    /// Panics when the handle is not attached; scripting a missing torrent
    /// is a test bug.
    pub fn set_status(&self, handle: SessionHandle, status: EngineStatus) {
        self.state()
            .torrents
            .get_mut(&handle)
            .expect("scripting status for unknown handle")
            .status = Some(status);
    }

    /// Script the peer list reported for an attached torrent.
    ///
    /// # Panics
    ///
    /// Panics when the handle is not attached.
    pub fn set_peers(&self, handle: SessionHandle, peers: Vec<PeerInfo>) {
        self.state()
            .torrents
            .get_mut(&handle)
            .expect("scripting peers for unknown handle")
            .peers = peers;
    }

    /// Script per-file completion for an attached torrent.
    ///
    /// # Panics
    ///
    /// Panics when the handle is not attached.
    pub fn set_file_progress(&self, handle: SessionHandle, progress: Vec<u64>) {
        self.state()
            .torrents
            .get_mut(&handle)
            .expect("scripting file progress for unknown handle")
            .file_progress = progress;
    }

    /// The transcript so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<SessionCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("recording session state poisoned")
    }
}

fn entry_mut(state: &mut MockState, handle: SessionHandle) -> EngineResult<&mut MockTorrent> {
    state
        .torrents
        .get_mut(&handle)
        .ok_or(EngineError::InvalidHandle { handle })
}

fn entry_ref(state: &MockState, handle: SessionHandle) -> EngineResult<&MockTorrent> {
    state
        .torrents
        .get(&handle)
        .ok_or(EngineError::InvalidHandle { handle })
}

impl EngineSession for RecordingSession {
    fn attach(&self, params: AttachParams) -> EngineResult<SessionHandle> {
        let mut state = self.state();
        if let Some(detail) = state.fail_attach.take() {
            return Err(EngineError::Failure {
                operation: "attach",
                detail,
            });
        }
        let handle = SessionHandle::generate();
        state.calls.push(SessionCall::Attach {
            name: params.metainfo.name.clone(),
            start_paused: params.start_paused,
            with_resume: params.resume_data.is_some(),
        });
        state.torrents.insert(
            handle,
            MockTorrent {
                paused: params.start_paused,
                status: None,
                peers: Vec::new(),
                file_progress: Vec::new(),
                trackers: params.metainfo.trackers.clone(),
            },
        );
        Ok(handle)
    }

    fn detach(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        state
            .torrents
            .remove(&handle)
            .ok_or(EngineError::InvalidHandle { handle })?;
        state.calls.push(SessionCall::Detach(handle));
        Ok(())
    }

    fn pause(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        entry_mut(&mut state, handle)?.paused = true;
        state.calls.push(SessionCall::Pause(handle));
        Ok(())
    }

    fn resume(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        entry_mut(&mut state, handle)?.paused = false;
        state.calls.push(SessionCall::Resume(handle));
        Ok(())
    }

    fn is_paused(&self, handle: SessionHandle) -> EngineResult<bool> {
        let state = self.state();
        entry_ref(&state, handle).map(|torrent| torrent.paused)
    }

    fn status(&self, handle: SessionHandle) -> EngineResult<EngineStatus> {
        let state = self.state();
        let torrent = entry_ref(&state, handle)?;
        let mut status = torrent.status.clone().unwrap_or_default();
        status.paused = torrent.paused;
        Ok(status)
    }

    fn peer_info(&self, handle: SessionHandle) -> EngineResult<Vec<PeerInfo>> {
        let state = self.state();
        entry_ref(&state, handle).map(|torrent| torrent.peers.clone())
    }

    fn file_progress(&self, handle: SessionHandle) -> EngineResult<Vec<u64>> {
        let state = self.state();
        entry_ref(&state, handle).map(|torrent| torrent.file_progress.clone())
    }

    fn set_download_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::DownloadLimit(handle, limit));
        Ok(())
    }

    fn set_upload_limit(&self, handle: SessionHandle, limit: Option<i64>) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::UploadLimit(handle, limit));
        Ok(())
    }

    fn set_max_connections(&self, handle: SessionHandle, limit: Option<u32>) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::MaxConnections(handle, limit));
        Ok(())
    }

    fn set_max_uploads(&self, handle: SessionHandle, limit: Option<u32>) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::MaxUploads(handle, limit));
        Ok(())
    }

    fn set_ratio(&self, handle: SessionHandle, ratio: f32) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::Ratio(handle, ratio));
        Ok(())
    }

    fn set_tracker_login(
        &self,
        handle: SessionHandle,
        username: &str,
        _password: &str,
    ) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state
            .calls
            .push(SessionCall::TrackerLogin(handle, username.to_owned()));
        Ok(())
    }

    fn replace_trackers(
        &self,
        handle: SessionHandle,
        trackers: &[TrackerEntry],
    ) -> EngineResult<()> {
        let mut state = self.state();
        entry_mut(&mut state, handle)?.trackers = trackers.to_vec();
        state
            .calls
            .push(SessionCall::ReplaceTrackers(handle, trackers.len()));
        Ok(())
    }

    fn trackers(&self, handle: SessionHandle) -> EngineResult<Vec<TrackerEntry>> {
        let state = self.state();
        entry_ref(&state, handle).map(|torrent| torrent.trackers.clone())
    }

    fn prioritize_files(
        &self,
        handle: SessionHandle,
        priorities: &[FilePriority],
    ) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state
            .calls
            .push(SessionCall::PrioritizeFiles(handle, priorities.len()));
        Ok(())
    }

    fn resolve_countries(&self, handle: SessionHandle, enabled: bool) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state
            .calls
            .push(SessionCall::ResolveCountries(handle, enabled));
        Ok(())
    }

    fn save_resume_data(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state.calls.push(SessionCall::SaveResumeData(handle));
        Ok(())
    }

    fn move_storage(&self, handle: SessionHandle, path: &Path) -> EngineResult<()> {
        let mut state = self.state();
        entry_ref(&state, handle)?;
        state
            .calls
            .push(SessionCall::MoveStorage(handle, path.to_path_buf()));
        Ok(())
    }

    fn load_metainfo(&self, path: &Path) -> EngineResult<Arc<TorrentMetadata>> {
        metainfo::load(path).map(Arc::new)
    }

    fn poll_alerts(&self) -> Vec<Alert> {
        self.state().alerts.drain(..).collect()
    }
}
