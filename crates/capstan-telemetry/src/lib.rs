//! Telemetry primitives shared across the Capstan workspace.
//!
//! This crate centralises logging and metrics so the control service and its
//! tests adopt a consistent observability story.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing_subscriber::{EnvFilter, fmt};

/// Default logging target when `RUST_LOG` is not provided.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be installed (for example,
/// because another subscriber has already been set globally).
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level));

    let install = |format: LogFormat| {
        let builder = fmt::fmt()
            .with_env_filter(env_filter.clone())
            .with_target(false)
            .with_thread_ids(false);

        match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        }
    };

    install(config.format).map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(())
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    pub level: &'a str,
    pub format: LogFormat,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Prometheus-backed metrics registry shared across the control service.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    lifecycle_transitions_total: IntCounterVec,
    alerts_dispatched_total: IntCounter,
    refresh_passes_total: IntCounter,
    engine_errors_total: IntCounter,
    torrents_registered: IntGauge,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let lifecycle_transitions_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_transitions_total",
                "Lifecycle transitions recorded by target state",
            ),
            &["state"],
        )?;
        let alerts_dispatched_total = IntCounter::with_opts(Opts::new(
            "alerts_dispatched_total",
            "Engine alerts dispatched to torrent controllers",
        ))?;
        let refresh_passes_total = IntCounter::with_opts(Opts::new(
            "refresh_passes_total",
            "Status refresh passes executed across the registry",
        ))?;
        let engine_errors_total = IntCounter::with_opts(Opts::new(
            "engine_errors_total",
            "Errors reported by the torrent engine",
        ))?;
        let torrents_registered = IntGauge::with_opts(Opts::new(
            "torrents_registered",
            "Number of torrents currently registered",
        ))?;

        registry.register(Box::new(lifecycle_transitions_total.clone()))?;
        registry.register(Box::new(alerts_dispatched_total.clone()))?;
        registry.register(Box::new(refresh_passes_total.clone()))?;
        registry.register(Box::new(engine_errors_total.clone()))?;
        registry.register(Box::new(torrents_registered.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                lifecycle_transitions_total,
                alerts_dispatched_total,
                refresh_passes_total,
                engine_errors_total,
                torrents_registered,
            }),
        })
    }

    /// Increment the transition counter for the given target state.
    pub fn inc_lifecycle_transition(&self, state: &str) {
        self.inner
            .lifecycle_transitions_total
            .with_label_values(&[state])
            .inc();
    }

    /// Increment the dispatched alert counter.
    pub fn inc_alert_dispatched(&self) {
        self.inner.alerts_dispatched_total.inc();
    }

    /// Increment the refresh pass counter.
    pub fn inc_refresh_pass(&self) {
        self.inner.refresh_passes_total.inc();
    }

    /// Increment the engine error counter.
    pub fn inc_engine_error(&self) {
        self.inner.engine_errors_total.inc();
    }

    /// Set the registered torrent gauge.
    pub fn set_torrents_registered(&self, count: i64) {
        self.inner.torrents_registered.set(count);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }
}
