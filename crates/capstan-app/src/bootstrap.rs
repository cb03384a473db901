use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use capstan_core::Stores;
use capstan_engine::{EngineSession, SimSession};
use capstan_events::EventBus;
use capstan_telemetry::{Metrics, init_logging};

use crate::error::{AppError, AppResult};
use crate::profile::AppProfile;
use crate::pump::{
    shutdown_channel, spawn_alert_pump, spawn_metrics_observer, spawn_refresh_reporter,
};
use crate::service::TorrentService;

/// Run the daemon until interrupted.
///
/// Restores persisted torrents, seeds any descriptors named on the command
/// line, and keeps the background tasks running until the process receives
/// an interrupt. Shutdown then settles in order: background tasks first,
/// then in-flight stops, then a final persistence pass.
///
/// # Errors
///
/// Returns an error when the profile is invalid, logging cannot be
/// installed, or the state directories cannot be created.
pub async fn run_app(profile: AppProfile) -> AppResult<()> {
    profile.validate()?;
    init_logging(&profile.logging())
        .map_err(|source| AppError::telemetry("install logging", source))?;
    let metrics =
        Metrics::new().map_err(|source| AppError::telemetry("register collectors", source))?;
    let session: Arc<dyn EngineSession> = Arc::new(SimSession::new());
    let service = Arc::new(build_service(&profile, session, EventBus::new(), metrics)?);
    run_with_service(&profile, service, wait_for_interrupt()).await
}

/// Assemble the service over prepared state directories.
pub(crate) fn build_service(
    profile: &AppProfile,
    session: Arc<dyn EngineSession>,
    events: EventBus,
    metrics: Metrics,
) -> AppResult<TorrentService> {
    let stores = Stores::new(profile.state_dir.clone());
    stores
        .ensure_layout()
        .map_err(|source| AppError::control("prepare state layout", source))?;
    Ok(TorrentService::new(
        session,
        events,
        stores,
        metrics,
        profile.save_dir.clone(),
    ))
}

/// Register and start the descriptors named on the command line.
///
/// A descriptor that fails to register is logged and skipped so one bad
/// path does not keep the daemon from starting.
pub(crate) fn seed_profile_torrents(service: &TorrentService, profile: &AppProfile) {
    for descriptor in &profile.torrents {
        match service.add_torrent(descriptor, service.default_options()) {
            Ok(controller) => controller.resume(),
            Err(error) => {
                warn!(path = %descriptor.display(), error = ?error, "startup torrent skipped");
            }
        }
    }
}

/// Drive the assembled service until the shutdown future completes.
pub(crate) async fn run_with_service(
    profile: &AppProfile,
    service: Arc<TorrentService>,
    shutdown: impl Future<Output = ()> + Send,
) -> AppResult<()> {
    let restored = service.restore();
    if restored > 0 {
        info!(count = restored, "torrents restored from disk");
    }
    seed_profile_torrents(&service, profile);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let pump = spawn_alert_pump(
        Arc::clone(&service),
        profile.alert_interval(),
        shutdown_rx.clone(),
    );
    let observer = spawn_metrics_observer(
        service.events().clone(),
        service.metrics().clone(),
        shutdown_rx.clone(),
    );
    let reporter = spawn_refresh_reporter(
        Arc::clone(&service),
        profile.refresh_interval(),
        shutdown_rx,
    );
    info!(
        torrents = service.len(),
        state_dir = %profile.state_dir.display(),
        "capstan running"
    );

    shutdown.await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    for task in [pump, observer, reporter] {
        if let Err(error) = task.await {
            warn!(error = %error, "background task ended abnormally");
        }
    }
    if !service.stop_all(profile.shutdown_grace()).await {
        warn!("shutdown grace expired with stops still in flight");
    }
    service.persist_all();
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_interrupt() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "interrupt handler failed; shutting down");
    }
}
