//! Background tasks that keep the daemon current.
//!
//! Three loops run for the life of the process: the alert pump drains the
//! engine's queue into the controllers, the refresh reporter logs an
//! aggregate status line, and the metrics observer folds bus events into
//! the Prometheus registry. All of them exit when the shutdown channel
//! flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use capstan_events::{Event, EventBus, LifecycleState};
use capstan_telemetry::Metrics;

use crate::service::TorrentService;

/// Sender half of the shutdown flag watched by every background task.
pub(crate) type ShutdownSender = watch::Sender<bool>;

/// Receiver half of the shutdown flag watched by every background task.
pub(crate) type ShutdownReceiver = watch::Receiver<bool>;

/// Create the shutdown channel shared by the background tasks.
#[must_use]
pub(crate) fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Spawn the loop that drains engine alerts into the controllers.
pub(crate) fn spawn_alert_pump(
    service: Arc<TorrentService>,
    interval: Duration,
    mut shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                // The channel only ever carries the shutdown flip.
                _ = shutdown.changed() => break,
                _ = ticker.tick() => service.dispatch_alerts(),
            }
        }
        debug!("alert pump stopped");
    })
}

/// Spawn the loop that logs an aggregate status line per refresh pass.
pub(crate) fn spawn_refresh_reporter(
    service: Arc<TorrentService>,
    interval: Duration,
    mut shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => report_refresh(&service),
            }
        }
        debug!("refresh reporter stopped");
    })
}

/// Spawn the loop that folds bus events into the metrics registry.
pub(crate) fn spawn_metrics_observer(
    events: EventBus,
    metrics: Metrics,
    mut shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = events.subscribe(Some(0));
        loop {
            tokio::select! {
                // Backlog first, so a quick shutdown still counts events
                // published before the observer started.
                biased;
                maybe = stream.next() => match maybe {
                    Some(envelope) => observe_event(&metrics, &envelope.event),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("metrics observer stopped");
    })
}

fn report_refresh(service: &TorrentService) {
    let details = service.refresh();
    if details.is_empty() {
        return;
    }
    let active = details
        .iter()
        .filter(|item| item.state == LifecycleState::Active)
        .count();
    let download_rate: f64 = details.iter().map(|item| item.download_rate).sum();
    let upload_rate: f64 = details.iter().map(|item| item.upload_rate).sum();
    info!(
        torrents = details.len(),
        active, download_rate, upload_rate, "status refresh"
    );
}

fn observe_event(metrics: &Metrics, event: &Event) {
    match event {
        Event::StateChanged { state, .. } => metrics.inc_lifecycle_transition(state.label()),
        Event::TorrentError { .. } | Event::InvalidTorrent { .. } => metrics.inc_engine_error(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::Stores;
    use capstan_engine::{Alert, EngineSession};
    use capstan_events::Severity;
    use capstan_test_support::fixtures;
    use capstan_test_support::mocks::RecordingSession;
    use tokio::time::timeout;

    fn service_over(
        session: &Arc<RecordingSession>,
        events: &EventBus,
        dir: &tempfile::TempDir,
    ) -> Arc<TorrentService> {
        Arc::new(TorrentService::new(
            Arc::clone(session) as Arc<dyn EngineSession>,
            events.clone(),
            Stores::new(dir.path().join("state")),
            Metrics::new().expect("metrics"),
            dir.path().join("payload"),
        ))
    }

    #[tokio::test]
    async fn pump_routes_alerts_until_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = Arc::new(RecordingSession::new());
        let events = EventBus::with_capacity(128);
        let service = service_over(&session, &events, &dir);
        let descriptor = fixtures::write_descriptor(dir.path(), "alpha", &[4_096]);
        let controller = service
            .add_torrent(&descriptor, service.default_options())
            .expect("add");
        controller.resume();
        let handle = controller.current_handle().expect("attached");
        session.push_alert(Alert::TorrentFinished { handle });

        let (sender, receiver) = shutdown_channel();
        let pump = spawn_alert_pump(Arc::clone(&service), Duration::from_millis(1), receiver);

        let mut stream = events.subscribe(Some(0));
        let routed = timeout(Duration::from_secs(2), async {
            loop {
                let envelope = stream.next().await.expect("bus stays open");
                if envelope.event.kind() == "torrent_finished" {
                    break;
                }
            }
        })
        .await;
        assert!(routed.is_ok(), "pump never routed the finish alert");

        sender.send(true).expect("signal shutdown");
        pump.await.expect("pump exits cleanly");
    }

    #[tokio::test]
    async fn observer_counts_transitions_and_errors() {
        let events = EventBus::with_capacity(64);
        let metrics = Metrics::new().expect("metrics");
        events.publish(Event::StateChanged {
            name: "alpha".into(),
            state: LifecycleState::Active,
        });
        events.publish(Event::TorrentError {
            severity: Severity::Warning,
            name: "alpha".into(),
            operation: "pause".into(),
            message: "engine offline".into(),
        });
        events.publish(Event::Message {
            severity: Severity::Info,
            message: "noted".into(),
        });

        let (sender, receiver) = shutdown_channel();
        let observer = spawn_metrics_observer(events.clone(), metrics.clone(), receiver);
        sender.send(true).expect("signal shutdown");
        observer.await.expect("observer exits");

        let rendered = metrics.render().expect("render");
        assert!(rendered.contains("lifecycle_transitions_total{state=\"active\"} 1"));
        assert!(rendered.contains("engine_errors_total 1"));
    }

    #[tokio::test]
    async fn reporter_counts_refresh_passes_and_exits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = Arc::new(RecordingSession::new());
        let events = EventBus::with_capacity(64);
        let service = service_over(&session, &events, &dir);

        report_refresh(&service);
        let rendered = service.metrics().render().expect("render");
        assert!(rendered.contains("refresh_passes_total 1"));

        let (sender, receiver) = shutdown_channel();
        let reporter =
            spawn_refresh_reporter(Arc::clone(&service), Duration::from_secs(60), receiver);
        sender.send(true).expect("signal shutdown");
        reporter.await.expect("reporter exits cleanly");
    }
}
