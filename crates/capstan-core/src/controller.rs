//! Per-torrent state machine and policy owner.
//!
//! A [`TorrentController`] drives one torrent through the lifecycle
//! `Stopped <-> Active <-> Paused` with the transient states `Pausing`
//! and `Stopping` in between. Pause and stop are asynchronous at the
//! engine: the controller records what should happen once the engine
//! confirms and settles only when the matching alert arrives, so a
//! newer command can supersede an older one simply by replacing the
//! recorded follow-up. Lifecycle commands and alert handling never
//! return errors; engine faults inside them are absorbed, logged, and
//! reported on the event bus.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use capstan_engine::{
    Alert, AttachParams, EngineError, EngineSession, FilePriority, PeerInfo, SessionHandle,
    StorageMode, TorrentMetadata, TrackerEntry,
};
use capstan_events::{Event, EventBus, LifecycleState, Severity};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::details::{FileDetail, PeerCounts, PeerDetail, TorrentDetails};
use crate::error::{ControlError, ControlResult};
use crate::settings::{StoredTorrent, StoredTorrentV2, TorrentSettings};
use crate::store::Stores;
use crate::tracker::{DurationTracker, TransferTracker};

/// Creation-time choices for a new torrent.
#[derive(Debug, Clone)]
pub struct TorrentOptions {
    /// Directory the payload is written to.
    pub save_directory: PathBuf,
    /// Directory the payload moves to once complete, when set.
    pub move_to_directory: Option<PathBuf>,
    /// Storage allocation mode, fixed for the life of the torrent.
    pub storage_mode: StorageMode,
}

/// What to do when the engine confirms the in-flight request.
///
/// At most one follow-up is armed at a time; issuing a newer command
/// replaces it, which is the whole supersede policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Plain pause: settle into `Paused` on confirmation.
    PauseSettle,
    /// Stop, phase one: request a resume-data flush once paused.
    StopFlush,
    /// Stop, phase two: detach when the flushed blob arrives.
    DetachOnBlob,
    /// Recheck: detach, drop stale resume data, re-attach fresh.
    RecheckRestart,
}

struct Inner {
    name: String,
    filename: String,
    metainfo: Option<Arc<TorrentMetadata>>,
    state: LifecycleState,
    handle: Option<SessionHandle>,
    pending: Option<Pending>,
    settings: TorrentSettings,
    downloaded: TransferTracker<i64>,
    uploaded: TransferTracker<i64>,
    payload_downloaded: TransferTracker<i64>,
    payload_uploaded: TransferTracker<i64>,
    active_duration: DurationTracker,
    seeding_duration: DurationTracker,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    peers: Vec<PeerInfo>,
    progress: f64,
}

/// Owns the lifecycle, policy, and statistics of a single torrent.
pub struct TorrentController {
    session: Arc<dyn EngineSession>,
    events: EventBus,
    stores: Stores,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for TorrentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentController").finish_non_exhaustive()
    }
}

impl TorrentController {
    /// A fresh controller in `Stopped` with default policy.
    ///
    /// [`prepare`](Self::prepare) must succeed before the controller can
    /// be registered or attached.
    #[must_use]
    pub fn new(
        session: Arc<dyn EngineSession>,
        events: EventBus,
        stores: Stores,
        options: TorrentOptions,
    ) -> Self {
        let mut settings = TorrentSettings::new(options.save_directory);
        settings.move_to_directory = options.move_to_directory;
        settings.storage_mode = options.storage_mode;
        Self {
            session,
            events,
            stores,
            inner: Mutex::new(Inner {
                name: String::new(),
                filename: String::new(),
                metainfo: None,
                state: LifecycleState::Stopped,
                handle: None,
                pending: None,
                settings,
                downloaded: TransferTracker::new(),
                uploaded: TransferTracker::new(),
                payload_downloaded: TransferTracker::new(),
                payload_uploaded: TransferTracker::new(),
                active_duration: DurationTracker::new(),
                seeding_duration: DurationTracker::new(),
                start_time: None,
                finish_time: None,
                peers: Vec::new(),
                progress: 0.0,
            }),
        }
    }

    /// Rebuild a controller from a persisted document.
    ///
    /// Statistics resume from the stored totals; transient states are
    /// normalized by the [`prepare`](Self::prepare) that follows.
    #[must_use]
    pub fn from_document(
        session: Arc<dyn EngineSession>,
        events: EventBus,
        stores: Stores,
        document: &StoredTorrentV2,
    ) -> Self {
        let mut downloaded = TransferTracker::new();
        downloaded.reset(document.downloaded);
        let mut uploaded = TransferTracker::new();
        uploaded.reset(document.uploaded);
        let mut payload_downloaded = TransferTracker::new();
        payload_downloaded.reset(document.payload_downloaded);
        let mut payload_uploaded = TransferTracker::new();
        payload_uploaded.reset(document.payload_uploaded);
        let mut active_duration = DurationTracker::new();
        active_duration.reset_to(Duration::seconds(document.active_duration));
        let mut seeding_duration = DurationTracker::new();
        seeding_duration.reset_to(Duration::seconds(document.seeding_duration));

        Self {
            session,
            events,
            stores,
            inner: Mutex::new(Inner {
                name: document.name.clone(),
                filename: document.filename.clone(),
                metainfo: None,
                state: document.state,
                handle: None,
                pending: None,
                settings: TorrentSettings::from(document),
                downloaded,
                uploaded,
                payload_downloaded,
                payload_uploaded,
                active_duration,
                seeding_duration,
                start_time: document.start_time,
                finish_time: document.finish_time,
                peers: Vec::new(),
                progress: document.progress,
            }),
        }
    }

    /// Parse the descriptor, archive it, and settle any stale transient
    /// state left by an unclean shutdown.
    ///
    /// The canonical name comes from the descriptor's metadata; the
    /// storage filename is the name with a `.torrent` extension appended
    /// when missing. A restored `Stopping` settles to `Stopped` and a
    /// restored `Pausing` to `Paused`, since whatever confirmation they
    /// were waiting for died with the previous process. A restored
    /// `Active` settles to `Paused` until the caller reattaches it.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Engine`] if the descriptor does not parse
    /// and [`ControlError::Io`] if the stores or save directory cannot be
    /// set up.
    pub fn prepare(&self, descriptor: &Path) -> ControlResult<()> {
        let mut inner = self.lock();
        let metadata =
            self.session
                .load_metainfo(descriptor)
                .map_err(|source| ControlError::Engine {
                    operation: "load metainfo",
                    source,
                })?;
        inner.name = metadata.name.clone();
        inner.filename = storage_filename(&metadata.name);

        self.stores.ensure_layout()?;
        fs::create_dir_all(&inner.settings.save_directory).map_err(|source| ControlError::Io {
            operation: "create save directory",
            path: inner.settings.save_directory.clone(),
            source,
        })?;
        self.stores.archive_descriptor(descriptor, &inner.filename)?;
        inner.metainfo = Some(metadata);

        match inner.state {
            LifecycleState::Stopping => inner.state = LifecycleState::Stopped,
            LifecycleState::Pausing => inner.state = LifecycleState::Paused,
            LifecycleState::Active if inner.handle.is_none() => {
                inner.state = LifecycleState::Paused;
            }
            _ => {}
        }
        inner.pending = None;
        Ok(())
    }

    /// Canonical display name, empty before [`prepare`](Self::prepare).
    #[must_use]
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Storage filename, empty before [`prepare`](Self::prepare).
    #[must_use]
    pub fn filename(&self) -> String {
        self.lock().filename.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// The engine handle while attached.
    #[must_use]
    pub fn current_handle(&self) -> Option<SessionHandle> {
        self.lock().handle
    }

    /// A copy of the buffered policy.
    #[must_use]
    pub fn settings(&self) -> TorrentSettings {
        self.lock().settings.clone()
    }

    /// Start or unpause the torrent.
    ///
    /// Attaches to the engine when detached; cancels any in-flight pause
    /// or stop otherwise. The armed follow-up is simply dropped, so a
    /// confirmation that still arrives is ignored as surplus.
    pub fn resume(&self) {
        let mut inner = self.lock();
        match (inner.state, inner.handle) {
            (LifecycleState::Active, _) => {}
            (_, Some(handle)) => {
                inner.pending = None;
                if let Err(error) = self.session.resume(handle) {
                    self.report_engine_error(&inner, "resume", &error);
                    return;
                }
                self.set_state(&mut inner, LifecycleState::Active);
            }
            (_, None) => {
                self.attach(&mut inner, false);
            }
        }
    }

    /// Pause the torrent, keeping it attached.
    ///
    /// From `Stopped` this attaches with the engine holding the torrent
    /// paused, so the torrent never passes through `Active`. While a stop
    /// is in flight the stop keeps priority and the pause is ignored.
    pub fn pause(&self) {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Pausing | LifecycleState::Stopping => {}
            LifecycleState::Paused => {
                if inner.handle.is_none() {
                    self.attach(&mut inner, true);
                }
            }
            LifecycleState::Stopped => {
                self.attach(&mut inner, true);
            }
            LifecycleState::Active => {
                if let Some(handle) = inner.handle {
                    match self.session.pause(handle) {
                        Ok(()) => {
                            inner.pending = Some(Pending::PauseSettle);
                            self.set_state(&mut inner, LifecycleState::Pausing);
                        }
                        Err(error) => self.report_engine_error(&inner, "pause", &error),
                    }
                }
            }
        }
    }

    /// Stop the torrent: flush resume data, then leave the session.
    ///
    /// The stop is two-phase. The engine first confirms the pause, then
    /// the controller requests a resume-data flush and detaches only once
    /// the blob (or its failure) comes back, so `Stopped` always means
    /// the resume data had its chance to reach disk. A pause already in
    /// flight is upgraded into the stop.
    pub fn stop(&self) {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Stopped | LifecycleState::Stopping => {}
            LifecycleState::Pausing => {
                inner.pending = Some(Pending::StopFlush);
                self.set_state(&mut inner, LifecycleState::Stopping);
            }
            LifecycleState::Paused => {
                if let Some(handle) = inner.handle {
                    match self.session.save_resume_data(handle) {
                        Ok(()) => {
                            inner.pending = Some(Pending::DetachOnBlob);
                            self.set_state(&mut inner, LifecycleState::Stopping);
                        }
                        Err(error) => {
                            self.report_engine_error(&inner, "save resume data", &error);
                            self.finalize_stop(&mut inner, None);
                        }
                    }
                } else {
                    self.set_state(&mut inner, LifecycleState::Stopped);
                }
            }
            LifecycleState::Active => {
                if let Some(handle) = inner.handle {
                    match self.session.pause(handle) {
                        Ok(()) => {
                            inner.pending = Some(Pending::StopFlush);
                            self.set_state(&mut inner, LifecycleState::Stopping);
                        }
                        Err(error) => {
                            self.report_engine_error(&inner, "pause", &error);
                            self.finalize_stop(&mut inner, None);
                        }
                    }
                }
            }
        }
    }

    /// Re-verify the payload against the descriptor.
    ///
    /// Attached torrents in any state are first brought to a confirmed
    /// pause, then detached, their resume data dropped, and re-attached;
    /// without resume data the engine has to verify everything. Detached
    /// torrents skip straight to the fresh attach. A recheck requested
    /// mid-stop wins over the stop.
    pub fn force_recheck(&self) {
        let mut inner = self.lock();
        if let Some(handle) = inner.handle {
            match self.session.pause(handle) {
                Ok(()) => {
                    inner.pending = Some(Pending::RecheckRestart);
                    self.set_state(&mut inner, LifecycleState::Pausing);
                }
                Err(error) => self.report_engine_error(&inner, "pause", &error),
            }
        } else {
            if let Err(error) = self.stores.clear_resume_blob(&inner.name) {
                self.report_store_error(&inner, "clear resume blob", &error);
            }
            self.attach(&mut inner, false);
        }
    }

    /// Apply one engine alert for this torrent.
    ///
    /// Alerts are matched against the armed follow-up; confirmations
    /// nobody is waiting for are harmless and ignored, which is what
    /// makes superseded commands safe.
    pub fn handle_alert(&self, alert: &Alert) {
        let mut inner = self.lock();
        match alert {
            Alert::TorrentPaused { .. } => match inner.pending {
                Some(Pending::PauseSettle) => {
                    inner.pending = None;
                    inner.active_duration.stop();
                    inner.seeding_duration.stop();
                    self.set_state(&mut inner, LifecycleState::Paused);
                }
                Some(Pending::StopFlush) => {
                    if let Some(handle) = inner.handle {
                        match self.session.save_resume_data(handle) {
                            Ok(()) => inner.pending = Some(Pending::DetachOnBlob),
                            Err(error) => {
                                self.report_engine_error(&inner, "save resume data", &error);
                                self.finalize_stop(&mut inner, None);
                            }
                        }
                    } else {
                        self.finalize_stop(&mut inner, None);
                    }
                }
                Some(Pending::RecheckRestart) => {
                    inner.pending = None;
                    self.restart_for_recheck(&mut inner);
                }
                Some(Pending::DetachOnBlob) | None => {
                    debug!(name = %inner.name, "surplus pause confirmation ignored");
                }
            },
            Alert::ResumeDataSaved { payload, .. } => {
                if inner.pending == Some(Pending::DetachOnBlob) {
                    inner.pending = None;
                    self.finalize_stop(&mut inner, Some(payload.as_slice()));
                } else {
                    // Periodic flush while running: keep the freshest blob.
                    self.store_resume_blob(&inner, payload);
                }
            }
            Alert::ResumeDataFailed { message, .. } => {
                self.events.publish(Event::TorrentError {
                    severity: Severity::Critical,
                    name: inner.name.clone(),
                    operation: "save resume data".to_owned(),
                    message: message.clone(),
                });
                if inner.pending == Some(Pending::DetachOnBlob) {
                    // The stop still completes; restart will re-verify.
                    inner.pending = None;
                    self.finalize_stop(&mut inner, None);
                }
            }
            Alert::TorrentFinished { .. } => {
                if inner.finish_time.is_none() {
                    inner.finish_time = Some(Utc::now());
                    self.events.publish(Event::TorrentFinished {
                        name: inner.name.clone(),
                    });
                    self.move_completed_payload(&mut inner);
                }
            }
            Alert::EngineNotice { message, .. } => {
                let text = format!("{}: {message}", inner.name);
                self.events.post(Severity::Info, text);
            }
        }
    }

    /// Update the transfer rate caps, in KiB per second.
    ///
    /// Negative values lift the cap. Applied immediately when attached,
    /// buffered for the next attach otherwise.
    pub fn set_transfer_limits(&self, download_kib: f64, upload_kib: f64) {
        let mut inner = self.lock();
        inner.settings.download_limit_kib = download_kib;
        inner.settings.upload_limit_kib = upload_kib;
        if let Some(handle) = inner.handle {
            self.apply_transfer_limits(&inner, handle);
        }
    }

    /// Update the connection and upload-slot caps.
    ///
    /// Non-positive values fall back to the engine defaults.
    pub fn set_connection_limits(&self, connections: i32, uploads: i32) {
        let mut inner = self.lock();
        inner.settings.connections = connections;
        inner.settings.uploads = uploads;
        if let Some(handle) = inner.handle {
            self.apply_connection_limits(&inner, handle);
        }
    }

    /// Update the stop-seeding ratio target; negative values clamp to
    /// zero, which seeds indefinitely.
    pub fn set_ratio(&self, ratio: f32) {
        let mut inner = self.lock();
        inner.settings.ratio = if ratio < 0.0 { 0.0 } else { ratio };
        if let Some(handle) = inner.handle {
            self.apply_ratio(&inner, handle);
        }
    }

    /// Update the credentials sent on tracker announces.
    pub fn set_tracker_login(&self, username: &str, password: &str) {
        let mut inner = self.lock();
        inner.settings.tracker_username = username.to_owned();
        inner.settings.tracker_password = password.to_owned();
        if let Some(handle) = inner.handle {
            self.apply_tracker_login(&inner, handle);
        }
    }

    /// Replace the tracker set announced to.
    pub fn set_trackers(&self, trackers: Vec<TrackerEntry>) {
        let mut inner = self.lock();
        inner.settings.trackers = trackers;
        if let Some(handle) = inner.handle {
            self.apply_trackers(&inner, handle);
        }
    }

    /// Drop any tracker override and go back to the descriptor's set.
    pub fn reset_trackers(&self) {
        let mut inner = self.lock();
        inner.settings.trackers.clear();
        if let (Some(handle), Some(metainfo)) = (inner.handle, inner.metainfo.clone()) {
            if let Err(error) = self.session.replace_trackers(handle, &metainfo.trackers) {
                self.report_engine_error(&inner, "replace trackers", &error);
            }
        }
    }

    /// The tracker set in effect: the override when set, otherwise the
    /// descriptor's.
    #[must_use]
    pub fn trackers(&self) -> Vec<TrackerEntry> {
        let inner = self.lock();
        if inner.settings.trackers.is_empty() {
            inner
                .metainfo
                .as_ref()
                .map(|metainfo| metainfo.trackers.clone())
                .unwrap_or_default()
        } else {
            inner.settings.trackers.clone()
        }
    }

    /// Set the priority for the given file indices; unknown indices are
    /// ignored.
    pub fn set_file_priorities(&self, indices: &[usize], priority: FilePriority) {
        let mut inner = self.lock();
        let file_count = inner
            .metainfo
            .as_ref()
            .map_or(0, |metainfo| metainfo.files.len());
        if file_count == 0 {
            return;
        }
        if inner.settings.file_priorities.len() != file_count {
            inner
                .settings
                .file_priorities
                .resize(file_count, FilePriority::Normal);
        }
        for &index in indices {
            if let Some(slot) = inner.settings.file_priorities.get_mut(index) {
                *slot = priority;
            }
        }
        if let Some(handle) = inner.handle {
            self.apply_file_priorities(&inner, handle);
        }
    }

    /// Per-file priorities in metainfo order, `Normal` where never set.
    #[must_use]
    pub fn file_priorities(&self) -> Vec<FilePriority> {
        let inner = self.lock();
        let file_count = inner
            .metainfo
            .as_ref()
            .map_or(0, |metainfo| metainfo.files.len());
        let mut priorities = inner.settings.file_priorities.clone();
        if priorities.len() < file_count {
            priorities.resize(file_count, FilePriority::Normal);
        }
        priorities
    }

    /// Toggle peer country resolution.
    pub fn set_resolve_countries(&self, enabled: bool) {
        let mut inner = self.lock();
        inner.settings.resolve_countries = enabled;
        if let Some(handle) = inner.handle {
            self.apply_resolve_countries(&inner, handle);
        }
    }

    /// Change the save directory, relocating payload storage when the
    /// torrent is attached.
    ///
    /// A finished torrent's payload is left where it is unless `force`
    /// is set.
    pub fn set_save_directory(&self, directory: PathBuf, force: bool) {
        let mut inner = self.lock();
        if inner.settings.save_directory == directory {
            return;
        }
        let finished = inner.finish_time.is_some();
        inner.settings.save_directory = directory;
        if let Some(handle) = inner.handle {
            if !finished || force {
                if let Err(error) =
                    self.session.move_storage(handle, &inner.settings.save_directory)
                {
                    self.report_engine_error(&inner, "move storage", &error);
                }
            }
        }
    }

    /// Change where the payload moves on completion.
    ///
    /// If the torrent has already finished, the move happens now while
    /// attached and on the next attach otherwise.
    pub fn set_move_to_directory(&self, directory: Option<PathBuf>) {
        let mut inner = self.lock();
        inner.settings.move_to_directory = directory;
        if inner.finish_time.is_some() {
            self.move_completed_payload(&mut inner);
        }
    }

    /// Build a point-in-time snapshot.
    ///
    /// Uses live engine status while attached; if the engine refuses the
    /// query the failure is reported and the snapshot falls back to the
    /// last known statistics. A handle the engine no longer recognizes
    /// settles the torrent to `Stopped` first. This never fails: a
    /// display surface always gets a row.
    #[must_use]
    pub fn details(&self) -> TorrentDetails {
        let mut inner = self.lock();
        if let Some(handle) = inner.handle {
            match self.live_details(&mut inner, handle) {
                Ok(details) => return details,
                Err(error) => {
                    if matches!(error, EngineError::InvalidHandle { .. }) {
                        self.events.publish(Event::InvalidTorrent {
                            severity: Severity::Critical,
                            identifier: inner.name.clone(),
                            operation: "snapshot".to_owned(),
                        });
                        // The engine lost this torrent; settle so later
                        // snapshots answer from rest instead of re-asking.
                        self.discard_lost_handle(&mut inner);
                    } else {
                        self.report_engine_error(&inner, "snapshot", &error);
                    }
                }
            }
        }
        self.resting_details(&inner)
    }

    /// Connected peers, refreshed from the engine when attached.
    #[must_use]
    pub fn peer_details(&self) -> Vec<PeerDetail> {
        let mut inner = self.lock();
        if let Some(handle) = inner.handle {
            match self.session.peer_info(handle) {
                Ok(peers) => inner.peers = peers,
                Err(error) => self.report_engine_error(&inner, "peer query", &error),
            }
        }
        inner.peers.iter().map(PeerDetail::from).collect()
    }

    /// Per-file completion and priorities, zeros when detached.
    #[must_use]
    pub fn file_details(&self) -> Vec<FileDetail> {
        let inner = self.lock();
        let Some(metainfo) = inner.metainfo.as_ref() else {
            return Vec::new();
        };
        let mut completed = vec![0_u64; metainfo.files.len()];
        if let Some(handle) = inner.handle {
            match self.session.file_progress(handle) {
                Ok(progress) => {
                    for (slot, value) in completed.iter_mut().zip(progress) {
                        *slot = value;
                    }
                }
                Err(error) => self.report_engine_error(&inner, "file progress", &error),
            }
        }
        metainfo
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| FileDetail {
                path: file.path.clone(),
                size: file.length,
                completed: completed[index].min(file.length),
                priority: inner
                    .settings
                    .file_priorities
                    .get(index)
                    .copied()
                    .unwrap_or_default(),
                index,
            })
            .collect()
    }

    /// Current state as a persistable document.
    #[must_use]
    pub fn to_document(&self) -> StoredTorrent {
        let inner = self.lock();
        StoredTorrent::V2(StoredTorrentV2 {
            name: inner.name.clone(),
            filename: inner.filename.clone(),
            save_directory: inner.settings.save_directory.clone(),
            move_to_directory: inner.settings.move_to_directory.clone(),
            allocation: inner.settings.storage_mode,
            download_limit: inner.settings.download_limit_kib,
            upload_limit: inner.settings.upload_limit_kib,
            connections: inner.settings.connections,
            uploads: inner.settings.uploads,
            ratio: inner.settings.ratio,
            resolve_countries: inner.settings.resolve_countries,
            tracker_username: inner.settings.tracker_username.clone(),
            tracker_password: inner.settings.tracker_password.clone(),
            trackers: inner.settings.trackers.clone(),
            file_priorities: inner.settings.file_priorities.clone(),
            state: inner.state,
            progress: inner.progress,
            downloaded: inner.downloaded.total(),
            uploaded: inner.uploaded.total(),
            payload_downloaded: inner.payload_downloaded.total(),
            payload_uploaded: inner.payload_uploaded.total(),
            active_duration: inner.active_duration.total().num_seconds(),
            seeding_duration: inner.seeding_duration.total().num_seconds(),
            start_time: inner.start_time,
            finish_time: inner.finish_time,
            saved_at: Utc::now(),
        })
    }

    /// Write the current document into the settings store.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] or [`ControlError::Document`] if the
    /// write fails.
    pub fn persist(&self) -> ControlResult<()> {
        let document = self.to_document();
        let filename = self.filename();
        self.stores.save_document(&filename, &document)
    }

    /// Detach without flushing and delete every stored artifact: the
    /// archived descriptor, the resume blob, and the document.
    ///
    /// Used when the torrent is removed outright; failures are reported
    /// on the bus and the cleanup keeps going.
    pub fn remove_artifacts(&self) {
        let mut inner = self.lock();
        if let Some(handle) = inner.handle.take() {
            if let Err(error) = self.session.detach(handle) {
                self.report_engine_error(&inner, "detach", &error);
            }
        }
        inner.pending = None;
        inner.peers.clear();
        if let Err(error) = self.stores.clear_resume_blob(&inner.name) {
            self.report_store_error(&inner, "clear resume blob", &error);
        }
        if let Err(error) = self.stores.remove_document(&inner.filename) {
            self.report_store_error(&inner, "remove torrent document", &error);
        }
        let descriptor = self.stores.archived_descriptor(&inner.filename);
        if descriptor.exists() {
            if let Err(error) = fs::remove_file(&descriptor) {
                self.events.publish(Event::TorrentError {
                    severity: Severity::Warning,
                    name: inner.name.clone(),
                    operation: "remove archived descriptor".to_owned(),
                    message: error.to_string(),
                });
            }
        }
        self.set_state(&mut inner, LifecycleState::Stopped);
    }

    fn attach(&self, inner: &mut Inner, start_paused: bool) -> bool {
        let Some(metainfo) = inner.metainfo.clone() else {
            self.events.publish(Event::TorrentError {
                severity: Severity::Critical,
                name: inner.name.clone(),
                operation: "attach".to_owned(),
                message: "descriptor metadata missing".to_owned(),
            });
            return false;
        };
        let resume_data = match self.stores.read_resume_blob(&inner.name) {
            Ok(blob) => blob,
            Err(error) => {
                self.report_store_error(inner, "read resume blob", &error);
                None
            }
        };
        let params = AttachParams {
            metainfo,
            save_path: inner.settings.save_directory.clone(),
            storage_mode: inner.settings.storage_mode,
            start_paused,
            resume_data,
        };
        match self.session.attach(params) {
            Ok(handle) => {
                inner.handle = Some(handle);
                inner.pending = None;
                // A fresh attachment restarts the engine counters at zero.
                inner.downloaded.set_offset(0);
                inner.uploaded.set_offset(0);
                inner.payload_downloaded.set_offset(0);
                inner.payload_uploaded.set_offset(0);
                if inner.start_time.is_none() {
                    inner.start_time = Some(Utc::now());
                }
                self.apply_settings(inner, handle);
                let target = if start_paused {
                    LifecycleState::Paused
                } else {
                    LifecycleState::Active
                };
                self.set_state(inner, target);
                // A move destination chosen while detached runs now.
                if inner.finish_time.is_some() {
                    self.move_completed_payload(inner);
                }
                true
            }
            Err(error) => {
                self.report_engine_error(inner, "attach", &error);
                self.set_state(inner, LifecycleState::Stopped);
                false
            }
        }
    }

    fn finalize_stop(&self, inner: &mut Inner, payload: Option<&[u8]>) {
        if let Some(payload) = payload {
            self.store_resume_blob(inner, payload);
        }
        if let Some(handle) = inner.handle.take() {
            if let Err(error) = self.session.detach(handle) {
                self.report_engine_error(inner, "detach", &error);
            }
        }
        inner.pending = None;
        inner.peers.clear();
        inner.active_duration.stop();
        inner.seeding_duration.stop();
        self.set_state(inner, LifecycleState::Stopped);
    }

    fn discard_lost_handle(&self, inner: &mut Inner) {
        inner.handle = None;
        inner.pending = None;
        inner.peers.clear();
        inner.active_duration.stop();
        inner.seeding_duration.stop();
        self.set_state(inner, LifecycleState::Stopped);
    }

    fn restart_for_recheck(&self, inner: &mut Inner) {
        if let Some(handle) = inner.handle.take() {
            if let Err(error) = self.session.detach(handle) {
                self.report_engine_error(inner, "detach", &error);
            }
        }
        if let Err(error) = self.stores.clear_resume_blob(&inner.name) {
            self.report_store_error(inner, "clear resume blob", &error);
        }
        self.attach(inner, false);
    }

    fn move_completed_payload(&self, inner: &mut Inner) {
        let Some(target) = inner.settings.move_to_directory.clone() else {
            return;
        };
        if target == inner.settings.save_directory {
            return;
        }
        let Some(handle) = inner.handle else {
            return;
        };
        if let Err(error) = self.session.move_storage(handle, &target) {
            self.report_engine_error(inner, "move storage", &error);
            return;
        }
        inner.settings.save_directory = target;
    }

    fn live_details(
        &self,
        inner: &mut Inner,
        handle: SessionHandle,
    ) -> Result<TorrentDetails, EngineError> {
        let status = self.session.status(handle)?;
        inner.peers = self.session.peer_info(handle)?;
        let now = Utc::now();

        inner.progress = status.progress;
        let downloaded = inner.downloaded.update(status.total_download);
        let uploaded = inner.uploaded.update(status.total_upload);
        let payload_downloaded = inner.payload_downloaded.update(status.total_payload_download);
        let payload_uploaded = inner.payload_uploaded.update(status.total_payload_upload);

        let seeding = status.progress >= 1.0;
        let (active_total, seeding_total) = if status.paused {
            inner.active_duration.stop();
            inner.seeding_duration.stop();
            (inner.active_duration.total(), inner.seeding_duration.total())
        } else {
            let active = inner.active_duration.update(now);
            let seeding_total = if seeding {
                inner.seeding_duration.update(now)
            } else {
                inner.seeding_duration.stop();
                inner.seeding_duration.total()
            };
            (active, seeding_total)
        };

        let remaining = (status.total_wanted - status.total_wanted_done).max(0);
        let eta_seconds = if !seeding && remaining > 0 && status.download_payload_rate > 0.0 {
            Some((remaining as f64 / status.download_payload_rate) as i64)
        } else {
            None
        };

        Ok(TorrentDetails {
            name: inner.name.clone(),
            filename: inner.filename.clone(),
            save_directory: inner.settings.save_directory.clone(),
            state: inner.state,
            activity: Some(status.state),
            progress: status.progress,
            total_size: inner
                .metainfo
                .as_ref()
                .map_or(0, |metainfo| metainfo.total_size),
            download_rate: status.download_rate,
            upload_rate: status.upload_rate,
            queue_position: Some(status.queue_position),
            distributed_copies: status.distributed_copies,
            total_wanted: status.total_wanted,
            total_wanted_done: status.total_wanted_done,
            downloaded,
            uploaded,
            payload_downloaded,
            payload_uploaded,
            peers: PeerCounts::tally(&inner.peers),
            ratio: achieved_ratio(payload_downloaded, payload_uploaded),
            eta_seconds,
            next_announce_seconds: status.next_announce.map(|until| until.num_seconds()),
            active_duration_seconds: active_total.num_seconds(),
            seeding_duration_seconds: seeding_total.num_seconds(),
            start_time: inner.start_time,
            finish_time: inner.finish_time,
            current_tracker: status.current_tracker,
        })
    }

    fn resting_details(&self, inner: &Inner) -> TorrentDetails {
        let total_size = inner
            .metainfo
            .as_ref()
            .map_or(0, |metainfo| metainfo.total_size);
        TorrentDetails {
            name: inner.name.clone(),
            filename: inner.filename.clone(),
            save_directory: inner.settings.save_directory.clone(),
            state: inner.state,
            activity: None,
            progress: inner.progress,
            total_size,
            download_rate: 0.0,
            upload_rate: 0.0,
            queue_position: None,
            distributed_copies: -1.0,
            total_wanted: total_size as i64,
            total_wanted_done: (inner.progress * total_size as f64) as i64,
            downloaded: inner.downloaded.total(),
            uploaded: inner.uploaded.total(),
            payload_downloaded: inner.payload_downloaded.total(),
            payload_uploaded: inner.payload_uploaded.total(),
            peers: PeerCounts::tally(&inner.peers),
            ratio: achieved_ratio(
                inner.payload_downloaded.total(),
                inner.payload_uploaded.total(),
            ),
            eta_seconds: None,
            next_announce_seconds: None,
            active_duration_seconds: inner.active_duration.total().num_seconds(),
            seeding_duration_seconds: inner.seeding_duration.total().num_seconds(),
            start_time: inner.start_time,
            finish_time: inner.finish_time,
            current_tracker: String::new(),
        }
    }

    fn apply_settings(&self, inner: &Inner, handle: SessionHandle) {
        self.apply_transfer_limits(inner, handle);
        self.apply_connection_limits(inner, handle);
        self.apply_ratio(inner, handle);
        self.apply_tracker_login(inner, handle);
        self.apply_trackers(inner, handle);
        self.apply_file_priorities(inner, handle);
        self.apply_resolve_countries(inner, handle);
    }

    fn apply_transfer_limits(&self, inner: &Inner, handle: SessionHandle) {
        if let Err(error) = self
            .session
            .set_download_limit(handle, inner.settings.download_limit_bytes())
        {
            self.report_engine_error(inner, "set download limit", &error);
        }
        if let Err(error) = self
            .session
            .set_upload_limit(handle, inner.settings.upload_limit_bytes())
        {
            self.report_engine_error(inner, "set upload limit", &error);
        }
    }

    fn apply_connection_limits(&self, inner: &Inner, handle: SessionHandle) {
        if let Err(error) = self
            .session
            .set_max_connections(handle, inner.settings.connection_cap())
        {
            self.report_engine_error(inner, "set connection cap", &error);
        }
        if let Err(error) = self
            .session
            .set_max_uploads(handle, inner.settings.upload_slot_cap())
        {
            self.report_engine_error(inner, "set upload slot cap", &error);
        }
    }

    fn apply_ratio(&self, inner: &Inner, handle: SessionHandle) {
        if let Err(error) = self.session.set_ratio(handle, inner.settings.ratio) {
            self.report_engine_error(inner, "set ratio", &error);
        }
    }

    fn apply_tracker_login(&self, inner: &Inner, handle: SessionHandle) {
        if inner.settings.tracker_username.is_empty() {
            return;
        }
        if let Err(error) = self.session.set_tracker_login(
            handle,
            &inner.settings.tracker_username,
            &inner.settings.tracker_password,
        ) {
            self.report_engine_error(inner, "set tracker login", &error);
        }
    }

    fn apply_trackers(&self, inner: &Inner, handle: SessionHandle) {
        if inner.settings.trackers.is_empty() {
            return;
        }
        if let Err(error) = self
            .session
            .replace_trackers(handle, &inner.settings.trackers)
        {
            self.report_engine_error(inner, "replace trackers", &error);
        }
    }

    fn apply_file_priorities(&self, inner: &Inner, handle: SessionHandle) {
        if inner.settings.file_priorities.is_empty() {
            return;
        }
        if let Err(error) = self
            .session
            .prioritize_files(handle, &inner.settings.file_priorities)
        {
            self.report_engine_error(inner, "prioritize files", &error);
        }
    }

    fn apply_resolve_countries(&self, inner: &Inner, handle: SessionHandle) {
        if let Err(error) = self
            .session
            .resolve_countries(handle, inner.settings.resolve_countries)
        {
            self.report_engine_error(inner, "resolve countries", &error);
        }
    }

    fn store_resume_blob(&self, inner: &Inner, payload: &[u8]) {
        match self.stores.write_resume_blob(&inner.name, payload) {
            Ok(()) => {
                self.events.publish(Event::ResumeDataSaved {
                    name: inner.name.clone(),
                });
            }
            Err(error) => self.report_store_error(inner, "write resume blob", &error),
        }
    }

    fn set_state(&self, inner: &mut Inner, state: LifecycleState) {
        if inner.state == state {
            return;
        }
        inner.state = state;
        debug!(name = %inner.name, state = state.label(), "lifecycle transition");
        self.events.publish(Event::StateChanged {
            name: inner.name.clone(),
            state,
        });
    }

    fn report_engine_error(&self, inner: &Inner, operation: &str, error: &EngineError) {
        warn!(name = %inner.name, operation, %error, "engine call failed");
        self.events.publish(Event::TorrentError {
            severity: Severity::Critical,
            name: inner.name.clone(),
            operation: operation.to_owned(),
            message: error.to_string(),
        });
    }

    fn report_store_error(&self, inner: &Inner, operation: &str, error: &ControlError) {
        warn!(name = %inner.name, operation, %error, "store access failed");
        self.events.publish(Event::TorrentError {
            severity: Severity::Warning,
            name: inner.name.clone(),
            operation: operation.to_owned(),
            message: error.to_string(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("controller lock poisoned")
    }
}

fn storage_filename(name: &str) -> String {
    if name.ends_with(".torrent") {
        name.to_owned()
    } else {
        format!("{name}.torrent")
    }
}

fn achieved_ratio(payload_downloaded: i64, payload_uploaded: i64) -> f32 {
    if payload_downloaded <= 0 {
        0.0
    } else {
        (payload_uploaded as f64 / payload_downloaded as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_engine::{EngineState, EngineStatus};
    use capstan_test_support::fixtures;
    use capstan_test_support::mocks::{RecordingSession, SessionCall};

    struct Harness {
        _dir: tempfile::TempDir,
        session: Arc<RecordingSession>,
        events: EventBus,
        stores: Stores,
        controller: TorrentController,
    }

    fn harness(name: &str) -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let session = Arc::new(RecordingSession::new());
        let events = EventBus::with_capacity(256);
        let stores = Stores::new(dir.path().join("state"));
        let controller = TorrentController::new(
            Arc::clone(&session) as Arc<dyn EngineSession>,
            events.clone(),
            stores.clone(),
            TorrentOptions {
                save_directory: dir.path().join("payload"),
                move_to_directory: None,
                storage_mode: StorageMode::Sparse,
            },
        );
        let descriptor = fixtures::write_descriptor(dir.path(), name, &[4_096]);
        controller.prepare(&descriptor).expect("prepare");
        Harness {
            _dir: dir,
            session,
            events,
            stores,
            controller,
        }
    }

    fn handle(harness: &Harness) -> SessionHandle {
        harness.controller.current_handle().expect("attached")
    }

    fn detach_count(harness: &Harness) -> usize {
        harness
            .session
            .calls()
            .iter()
            .filter(|call| matches!(call, SessionCall::Detach(_)))
            .count()
    }

    fn state_events(harness: &Harness) -> Vec<LifecycleState> {
        harness
            .events
            .events_since(0)
            .into_iter()
            .filter_map(|envelope| match envelope.event {
                Event::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    fn event_kinds(harness: &Harness) -> Vec<&'static str> {
        harness
            .events
            .events_since(0)
            .iter()
            .map(|envelope| envelope.event.kind())
            .collect()
    }

    #[test]
    fn prepare_derives_names_and_archives_the_descriptor() {
        let harness = harness("alpha");
        assert_eq!(harness.controller.name(), "alpha");
        assert_eq!(harness.controller.filename(), "alpha.torrent");
        assert!(harness.stores.archived_descriptor("alpha.torrent").is_file());
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn resume_attaches_and_applies_buffered_policy() {
        let harness = harness("alpha");
        harness.controller.set_transfer_limits(256.0, -1.0);
        harness.controller.set_connection_limits(40, 6);
        assert!(
            harness.session.calls().is_empty(),
            "detached policy changes must not touch the engine"
        );

        harness.controller.resume();
        assert_eq!(harness.controller.state(), LifecycleState::Active);

        let attached = handle(&harness);
        let calls = harness.session.calls();
        assert!(calls.contains(&SessionCall::Attach {
            name: "alpha".to_owned(),
            start_paused: false,
            with_resume: false,
        }));
        assert!(calls.contains(&SessionCall::DownloadLimit(attached, Some(262_144))));
        assert!(calls.contains(&SessionCall::UploadLimit(attached, None)));
        assert!(calls.contains(&SessionCall::MaxConnections(attached, Some(40))));
        assert!(calls.contains(&SessionCall::MaxUploads(attached, Some(6))));
    }

    #[test]
    fn pause_from_stopped_never_passes_through_active() {
        let harness = harness("alpha");
        harness.controller.pause();

        assert_eq!(harness.controller.state(), LifecycleState::Paused);
        let calls = harness.session.calls();
        assert!(calls.contains(&SessionCall::Attach {
            name: "alpha".to_owned(),
            start_paused: true,
            with_resume: false,
        }));
        assert!(
            !state_events(&harness).contains(&LifecycleState::Active),
            "held attach must not announce Active"
        );
    }

    #[test]
    fn pause_settles_only_after_the_engine_confirms() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.pause();
        assert_eq!(harness.controller.state(), LifecycleState::Pausing);

        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        assert_eq!(harness.controller.state(), LifecycleState::Paused);
    }

    #[test]
    fn resume_supersedes_an_inflight_pause() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.pause();
        harness.controller.resume();
        assert_eq!(harness.controller.state(), LifecycleState::Active);

        // The confirmation for the superseded pause arrives late.
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        assert_eq!(harness.controller.state(), LifecycleState::Active);
    }

    #[test]
    fn stop_flushes_resume_data_then_detaches_exactly_once() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.stop();
        assert_eq!(harness.controller.state(), LifecycleState::Stopping);

        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        assert_eq!(harness.controller.state(), LifecycleState::Stopping);
        assert!(
            harness
                .session
                .calls()
                .contains(&SessionCall::SaveResumeData(attached))
        );

        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"resume-bytes".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
        assert_eq!(harness.controller.current_handle(), None);
        assert_eq!(detach_count(&harness), 1);
        assert_eq!(
            harness.stores.read_resume_blob("alpha").expect("blob"),
            Some(b"resume-bytes".to_vec())
        );

        // A duplicate blob alert after the stop must not detach again.
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"late".to_vec(),
        });
        assert_eq!(detach_count(&harness), 1);
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stop_completes_even_when_the_flush_fails() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        harness.controller.handle_alert(&Alert::ResumeDataFailed {
            handle: attached,
            message: "disk gone".to_owned(),
        });

        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
        assert_eq!(detach_count(&harness), 1);
        assert_eq!(harness.stores.read_resume_blob("alpha").expect("blob"), None);
        assert!(event_kinds(&harness).contains(&"torrent_error"));
    }

    #[test]
    fn stop_upgrades_an_inflight_pause() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.pause();
        harness.controller.stop();
        assert_eq!(harness.controller.state(), LifecycleState::Stopping);

        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        // The pause confirmation feeds the stop, not a settle into Paused.
        assert_eq!(harness.controller.state(), LifecycleState::Stopping);
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"blob".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stop_from_paused_still_flushes_resume_data() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);
        harness.controller.pause();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        assert_eq!(harness.controller.state(), LifecycleState::Paused);

        harness.controller.stop();
        assert_eq!(harness.controller.state(), LifecycleState::Stopping);
        assert!(
            harness
                .session
                .calls()
                .contains(&SessionCall::SaveResumeData(attached))
        );

        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"blob".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn recheck_clears_resume_data_and_reattaches_fresh() {
        let harness = harness("alpha");
        harness.controller.resume();
        let first = handle(&harness);

        // Stop to leave a blob behind.
        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: first });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: first,
            payload: b"stale".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);

        // Restart resumes from the blob.
        harness.controller.resume();
        let second = handle(&harness);
        assert!(harness.session.calls().contains(&SessionCall::Attach {
            name: "alpha".to_owned(),
            start_paused: false,
            with_resume: true,
        }));

        harness.controller.force_recheck();
        assert_eq!(harness.controller.state(), LifecycleState::Pausing);
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: second });

        assert_eq!(harness.controller.state(), LifecycleState::Active);
        let third = handle(&harness);
        assert_ne!(second, third);
        assert_eq!(harness.stores.read_resume_blob("alpha").expect("blob"), None);
        assert_eq!(detach_count(&harness), 2);
        let fresh_attaches = harness
            .session
            .calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    SessionCall::Attach {
                        with_resume: false,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(fresh_attaches, 2, "initial attach plus recheck attach");
    }

    #[test]
    fn recheck_of_a_stopped_torrent_attaches_without_resume_data() {
        let harness = harness("alpha");
        harness.controller.resume();
        let first = handle(&harness);
        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: first });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: first,
            payload: b"stale".to_vec(),
        });

        harness.controller.force_recheck();
        assert_eq!(harness.controller.state(), LifecycleState::Active);
        assert_eq!(harness.stores.read_resume_blob("alpha").expect("blob"), None);
        let last_attach = harness
            .session
            .calls()
            .iter()
            .rev()
            .find_map(|call| match call {
                SessionCall::Attach { with_resume, .. } => Some(*with_resume),
                _ => None,
            });
        assert_eq!(last_attach, Some(false));
    }

    #[test]
    fn finish_stamps_once_and_moves_the_payload() {
        let harness = harness("alpha");
        let library = harness._dir.path().join("library");
        harness
            .controller
            .set_move_to_directory(Some(library.clone()));
        harness.controller.resume();
        let attached = handle(&harness);

        harness
            .controller
            .handle_alert(&Alert::TorrentFinished { handle: attached });
        let details = harness.controller.details();
        assert!(details.finish_time.is_some());
        assert_eq!(details.save_directory, library);
        assert!(
            harness
                .session
                .calls()
                .contains(&SessionCall::MoveStorage(attached, library.clone()))
        );

        let stamp = details.finish_time;
        harness
            .controller
            .handle_alert(&Alert::TorrentFinished { handle: attached });
        assert_eq!(harness.controller.details().finish_time, stamp);
        let finish_events = event_kinds(&harness)
            .iter()
            .filter(|kind| **kind == "torrent_finished")
            .count();
        assert_eq!(finish_events, 1);
    }

    #[test]
    fn attach_failure_reports_and_stays_stopped() {
        let harness = harness("alpha");
        harness.session.fail_next_attach("no space for torrent");

        harness.controller.resume();
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);
        assert_eq!(harness.controller.current_handle(), None);
        assert!(event_kinds(&harness).contains(&"torrent_error"));
    }

    #[test]
    fn snapshot_settles_to_stopped_when_the_handle_goes_invalid() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        // The engine loses the torrent behind the controller's back.
        harness.session.detach(attached).expect("forced detach");

        let details = harness.controller.details();
        assert_eq!(details.state, LifecycleState::Stopped);
        assert_eq!(details.activity, None);
        assert!(details.download_rate.abs() < f64::EPSILON);
        assert_eq!(harness.controller.current_handle(), None);
        let reported = harness
            .events
            .events_since(0)
            .into_iter()
            .find_map(|envelope| match envelope.event {
                Event::InvalidTorrent { severity, .. } => Some(severity),
                _ => None,
            });
        assert_eq!(reported, Some(Severity::Critical));

        // Settled means later snapshots stop asking the engine.
        let _ = harness.controller.details();
        let reports = event_kinds(&harness)
            .iter()
            .filter(|kind| **kind == "invalid_torrent")
            .count();
        assert_eq!(reports, 1);
    }

    #[test]
    fn move_destination_chosen_while_detached_applies_on_reattach() {
        let harness = harness("alpha");
        harness.controller.resume();
        let first = handle(&harness);
        harness
            .controller
            .handle_alert(&Alert::TorrentFinished { handle: first });

        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: first });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: first,
            payload: b"blob".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Stopped);

        let library = harness._dir.path().join("library");
        harness
            .controller
            .set_move_to_directory(Some(library.clone()));
        assert!(
            !harness
                .session
                .calls()
                .iter()
                .any(|call| matches!(call, SessionCall::MoveStorage(..))),
            "no handle, nothing to relocate yet"
        );

        harness.controller.resume();
        let second = handle(&harness);
        assert!(
            harness
                .session
                .calls()
                .contains(&SessionCall::MoveStorage(second, library.clone()))
        );
        assert_eq!(harness.controller.settings().save_directory, library);
    }

    #[test]
    fn counters_accumulate_across_stop_and_restart() {
        let harness = harness("alpha");
        harness.controller.resume();
        let first = handle(&harness);

        harness.session.set_status(
            first,
            EngineStatus {
                progress: 0.4,
                state: EngineState::Downloading,
                total_download: 1_000,
                total_payload_download: 900,
                ..EngineStatus::default()
            },
        );
        assert_eq!(harness.controller.details().downloaded, 1_000);

        harness.session.set_status(
            first,
            EngineStatus {
                progress: 0.6,
                state: EngineState::Downloading,
                total_download: 1_500,
                total_payload_download: 1_400,
                ..EngineStatus::default()
            },
        );
        assert_eq!(harness.controller.details().downloaded, 1_500);

        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: first });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: first,
            payload: b"blob".to_vec(),
        });

        harness.controller.resume();
        let second = handle(&harness);
        harness.session.set_status(
            second,
            EngineStatus {
                progress: 0.7,
                state: EngineState::Downloading,
                total_download: 300,
                total_payload_download: 250,
                ..EngineStatus::default()
            },
        );
        let details = harness.controller.details();
        assert_eq!(details.downloaded, 1_800, "fresh counter re-based, not re-counted");
        assert_eq!(details.payload_downloaded, 1_650);
    }

    #[test]
    fn live_policy_changes_reach_the_engine() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.set_ratio(-2.0);
        harness.controller.set_resolve_countries(true);
        harness.controller.set_trackers(vec![
            TrackerEntry {
                url: "http://primary.example/announce".to_owned(),
                tier: 0,
            },
            TrackerEntry {
                url: "http://backup.example/announce".to_owned(),
                tier: 1,
            },
        ]);
        harness.controller.set_file_priorities(&[0], FilePriority::Skip);
        harness.controller.reset_trackers();

        let calls = harness.session.calls();
        assert!(calls.contains(&SessionCall::Ratio(attached, 0.0)), "negative ratio clamps");
        assert!(calls.contains(&SessionCall::ResolveCountries(attached, true)));
        assert!(calls.contains(&SessionCall::ReplaceTrackers(attached, 2)));
        assert!(
            calls.contains(&SessionCall::ReplaceTrackers(attached, 1)),
            "reset reinstates the descriptor announce set"
        );
        assert!(calls.contains(&SessionCall::PrioritizeFiles(attached, 1)));
        assert_eq!(
            harness.controller.file_priorities(),
            vec![FilePriority::Skip]
        );
        let trackers = harness.controller.trackers();
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].url, "http://tracker.example/announce");
    }

    #[test]
    fn documents_round_trip_through_the_store() {
        let harness = harness("alpha");
        harness.controller.set_transfer_limits(128.0, 64.0);
        harness.controller.resume();
        let attached = handle(&harness);
        harness.session.set_status(
            attached,
            EngineStatus {
                progress: 0.8,
                state: EngineState::Downloading,
                total_download: 2_000,
                total_upload: 700,
                ..EngineStatus::default()
            },
        );
        let _ = harness.controller.details();

        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"blob".to_vec(),
        });
        harness.controller.persist().expect("persist");

        let document = harness
            .stores
            .load_document("alpha.torrent")
            .expect("load")
            .expect("present")
            .migrate(Utc::now());
        assert_eq!(document.name, "alpha");
        assert_eq!(document.state, LifecycleState::Stopped);
        assert_eq!(document.downloaded, 2_000);
        assert_eq!(document.uploaded, 700);
        assert!((document.download_limit - 128.0).abs() < f64::EPSILON);

        let restored = TorrentController::from_document(
            Arc::clone(&harness.session) as Arc<dyn EngineSession>,
            EventBus::with_capacity(64),
            harness.stores.clone(),
            &document,
        );
        restored
            .prepare(&harness.stores.archived_descriptor("alpha.torrent"))
            .expect("prepare restored");
        assert_eq!(restored.state(), LifecycleState::Stopped);
        assert_eq!(restored.details().downloaded, 2_000);
        let settings = restored.settings();
        assert!((settings.download_limit_kib - 128.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stale_transient_states_settle_during_prepare() {
        let harness = harness("alpha");
        harness.controller.persist().expect("persist");
        let document = harness
            .stores
            .load_document("alpha.torrent")
            .expect("load")
            .expect("present")
            .migrate(Utc::now());

        for (stored, settled) in [
            (LifecycleState::Stopping, LifecycleState::Stopped),
            (LifecycleState::Pausing, LifecycleState::Paused),
            (LifecycleState::Active, LifecycleState::Paused),
        ] {
            let mut copy = document.clone();
            copy.state = stored;
            let restored = TorrentController::from_document(
                Arc::clone(&harness.session) as Arc<dyn EngineSession>,
                EventBus::with_capacity(64),
                harness.stores.clone(),
                &copy,
            );
            restored
                .prepare(&harness.stores.archived_descriptor("alpha.torrent"))
                .expect("prepare");
            assert_eq!(restored.state(), settled);
        }
    }

    #[test]
    fn remove_artifacts_deletes_everything_stored() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);
        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"blob".to_vec(),
        });
        harness.controller.persist().expect("persist");

        harness.controller.remove_artifacts();
        assert!(!harness.stores.archived_descriptor("alpha.torrent").exists());
        assert_eq!(harness.stores.read_resume_blob("alpha").expect("blob"), None);
        assert_eq!(
            harness.stores.load_document("alpha.torrent").expect("load"),
            None
        );
    }

    #[test]
    fn file_details_merge_progress_with_priorities() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);
        harness.session.set_file_progress(attached, vec![2_048]);
        harness.controller.set_file_priorities(&[0], FilePriority::High);

        let files = harness.controller.file_details();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("alpha"));
        assert_eq!(files[0].size, 4_096);
        assert_eq!(files[0].completed, 2_048);
        assert_eq!(files[0].priority, FilePriority::High);
        assert!((files[0].progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn peer_details_clear_once_the_torrent_stops() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);
        harness.session.set_peers(
            attached,
            vec![PeerInfo {
                address: "203.0.113.7:6881".to_owned(),
                client: "test-peer/1.0".to_owned(),
                download_rate: 1_024.0,
                upload_rate: 256.0,
                seed: true,
                country: "SE".to_owned(),
            }],
        );
        let peers = harness.controller.peer_details();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "203.0.113.7:6881");
        assert!(peers[0].seed);

        harness.controller.stop();
        harness
            .controller
            .handle_alert(&Alert::TorrentPaused { handle: attached });
        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"blob".to_vec(),
        });
        assert!(harness.controller.peer_details().is_empty());
    }

    #[test]
    fn unsolicited_resume_data_is_kept_fresh() {
        let harness = harness("alpha");
        harness.controller.resume();
        let attached = handle(&harness);

        harness.controller.handle_alert(&Alert::ResumeDataSaved {
            handle: attached,
            payload: b"periodic".to_vec(),
        });
        assert_eq!(harness.controller.state(), LifecycleState::Active);
        assert_eq!(
            harness.stores.read_resume_blob("alpha").expect("blob"),
            Some(b"periodic".to_vec())
        );
        assert_eq!(detach_count(&harness), 0);
    }
}
