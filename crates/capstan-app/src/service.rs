//! Name-keyed façade over the torrent control layer.
//!
//! The service owns the registry, the engine session, and the persistence
//! stores, and exposes the operations the daemon shell needs: registering
//! and removing torrents, routing lifecycle commands by identifier,
//! draining the engine's alert queue, and sweeping persisted documents
//! back into live controllers at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use capstan_core::{Stores, TorrentController, TorrentDetails, TorrentOptions, TorrentRegistry};
use capstan_engine::{Alert, EngineSession, StorageMode};
use capstan_events::{Event, EventBus, LifecycleState, Severity};
use capstan_telemetry::Metrics;

use crate::error::{AppError, AppResult};

/// Poll spacing while waiting for stop confirmations during shutdown.
const SETTLE_POLL: Duration = Duration::from_millis(20);

/// Shared state behind every daemon operation.
pub struct TorrentService {
    session: Arc<dyn EngineSession>,
    registry: TorrentRegistry,
    events: EventBus,
    stores: Stores,
    metrics: Metrics,
    default_save_directory: PathBuf,
}

impl TorrentService {
    /// Assemble a service over the given engine session and stores.
    #[must_use]
    pub fn new(
        session: Arc<dyn EngineSession>,
        events: EventBus,
        stores: Stores,
        metrics: Metrics,
        default_save_directory: PathBuf,
    ) -> Self {
        Self {
            session,
            registry: TorrentRegistry::new(),
            events,
            stores,
            metrics,
            default_save_directory,
        }
    }

    /// The event bus shared with every controller.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The metrics registry shared with the background tasks.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Number of registered torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no torrents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Options applying the profile's default save directory.
    #[must_use]
    pub fn default_options(&self) -> TorrentOptions {
        TorrentOptions {
            save_directory: self.default_save_directory.clone(),
            move_to_directory: None,
            storage_mode: StorageMode::Sparse,
        }
    }

    /// Register a new torrent from a descriptor file.
    ///
    /// The controller is prepared, indexed under both its name and
    /// filename, and persisted. The torrent starts out `Stopped`; callers
    /// decide whether to resume it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the descriptor does not parse or
    /// a torrent with the same name is already registered.
    pub fn add_torrent(
        &self,
        descriptor: &Path,
        options: TorrentOptions,
    ) -> AppResult<Arc<TorrentController>> {
        let controller = Arc::new(TorrentController::new(
            Arc::clone(&self.session),
            self.events.clone(),
            self.stores.clone(),
            options,
        ));
        controller
            .prepare(descriptor)
            .map_err(|source| AppError::control("prepare torrent", source))?;
        self.registry
            .insert(Arc::clone(&controller))
            .map_err(|source| AppError::control("register torrent", source))?;
        if let Err(error) = controller.persist() {
            warn!(name = %controller.name(), error = %error, "initial persist failed");
        }
        self.events.publish(Event::TorrentAdded {
            name: controller.name(),
        });
        self.record_registered();
        info!(name = %controller.name(), "torrent added");
        Ok(controller)
    }

    /// Drop a torrent and everything persisted for it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn remove_torrent(&self, identifier: &str) -> AppResult<()> {
        let controller = self
            .registry
            .erase(identifier)
            .map_err(|source| AppError::control("remove torrent", source))?;
        controller.remove_artifacts();
        self.events.publish(Event::TorrentRemoved {
            name: controller.name(),
        });
        self.record_registered();
        info!(name = %controller.name(), "torrent removed");
        Ok(())
    }

    /// Start or unpause a torrent by name or filename.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn resume(&self, identifier: &str) -> AppResult<()> {
        self.lookup(identifier, "resume torrent")?.resume();
        Ok(())
    }

    /// Pause a torrent by name or filename.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn pause(&self, identifier: &str) -> AppResult<()> {
        self.lookup(identifier, "pause torrent")?.pause();
        Ok(())
    }

    /// Stop a torrent by name or filename.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn stop(&self, identifier: &str) -> AppResult<()> {
        self.lookup(identifier, "stop torrent")?.stop();
        Ok(())
    }

    /// Re-verify a torrent's payload by name or filename.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn force_recheck(&self, identifier: &str) -> AppResult<()> {
        self.lookup(identifier, "recheck torrent")?.force_recheck();
        Ok(())
    }

    /// Status snapshot for a single torrent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Control`] when the identifier matches nothing.
    pub fn details(&self, identifier: &str) -> AppResult<TorrentDetails> {
        Ok(self.lookup(identifier, "torrent details")?.details())
    }

    /// Status snapshots for every registered torrent, in name order.
    ///
    /// Controllers removed mid-pass still answer from their snapshot
    /// reference, so a refresh never observes a half-removed torrent.
    #[must_use]
    pub fn refresh(&self) -> Vec<TorrentDetails> {
        let controllers = self.registry.snapshot();
        let mut details = Vec::with_capacity(controllers.len());
        for controller in &controllers {
            details.push(controller.details());
        }
        self.metrics.inc_refresh_pass();
        details
    }

    /// Write every torrent's document, continuing past individual failures.
    pub fn persist_all(&self) {
        for controller in self.registry.snapshot() {
            if let Err(error) = controller.persist() {
                warn!(name = %controller.name(), error = %error, "persist failed");
            }
        }
    }

    /// Drain the engine's alert queue, routing each alert to the controller
    /// that currently owns its handle.
    ///
    /// Confirmations may outlive their torrent, so an alert without a live
    /// owner is dropped rather than treated as an error. Session-level
    /// notices without a handle go straight to the event log.
    pub fn dispatch_alerts(&self) {
        let alerts = self.session.poll_alerts();
        if alerts.is_empty() {
            return;
        }
        let controllers = self.registry.snapshot();
        let mut routed = 0_usize;
        for alert in &alerts {
            let Some(handle) = alert.handle() else {
                if let Alert::EngineNotice { message, .. } = alert {
                    self.events.post(Severity::Info, message.clone());
                    self.metrics.inc_alert_dispatched();
                    routed += 1;
                }
                continue;
            };
            let owner = controllers
                .iter()
                .find(|controller| controller.current_handle() == Some(handle));
            let Some(controller) = owner else {
                debug!(kind = alert.kind(), "alert without a live owner dropped");
                continue;
            };
            controller.handle_alert(alert);
            self.metrics.inc_alert_dispatched();
            routed += 1;
        }
        debug!(count = routed, drained = alerts.len(), "alerts dispatched");
    }

    /// Request a stop for every torrent and pump confirmations until all of
    /// them settle or the grace period runs out. Returns whether everything
    /// reached `Stopped`.
    #[must_use]
    pub async fn stop_all(&self, grace: Duration) -> bool {
        let controllers = self.registry.snapshot();
        for controller in &controllers {
            controller.stop();
        }
        let deadline = Instant::now() + grace;
        loop {
            self.dispatch_alerts();
            if controllers
                .iter()
                .all(|controller| controller.state() == LifecycleState::Stopped)
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    /// Rebuild controllers from persisted documents.
    ///
    /// Documents that no longer parse or collide with a live torrent are
    /// skipped with a warning. A torrent persisted while running is
    /// reattached; resume blobs are picked up by the attachment itself.
    /// Returns how many torrents came back.
    #[must_use]
    pub fn restore(&self) -> usize {
        let mut restored = 0;
        for document in self.stores.sweep_documents() {
            let document = document.migrate(Utc::now());
            let resume_wanted = document.state == LifecycleState::Active;
            let controller = Arc::new(TorrentController::from_document(
                Arc::clone(&self.session),
                self.events.clone(),
                self.stores.clone(),
                &document,
            ));
            let descriptor = self.stores.archived_descriptor(&document.filename);
            if let Err(error) = controller.prepare(&descriptor) {
                warn!(name = %document.name, error = %error, "skipping unrestorable torrent");
                continue;
            }
            if let Err(error) = self.registry.insert(Arc::clone(&controller)) {
                warn!(name = %document.name, error = %error, "skipping colliding document");
                continue;
            }
            if resume_wanted {
                controller.resume();
            }
            restored += 1;
        }
        self.record_registered();
        restored
    }

    fn lookup(
        &self,
        identifier: &str,
        operation: &'static str,
    ) -> AppResult<Arc<TorrentController>> {
        self.registry
            .resolve(identifier)
            .map_err(|source| AppError::control(operation, source))
    }

    fn record_registered(&self) {
        let count = i64::try_from(self.registry.len()).unwrap_or(i64::MAX);
        self.metrics.set_torrents_registered(count);
    }
}
