//! Runtime profile parsed from the command line and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use capstan_telemetry::{LogFormat, LoggingConfig};

use crate::error::{AppError, AppResult};

const DEFAULT_STATE_DIR: &str = "capstan-state";
const DEFAULT_SAVE_DIR: &str = "downloads";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
const DEFAULT_ALERT_INTERVAL_MS: u64 = 250;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Runtime configuration for the Capstan daemon.
#[derive(Debug, Clone, Parser)]
#[command(name = "capstan", about = "Torrent lifecycle daemon")]
pub struct AppProfile {
    /// Directory holding archived descriptors, resume blobs, and documents.
    #[arg(long, env = "CAPSTAN_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Default download directory for newly added torrents.
    #[arg(long, env = "CAPSTAN_SAVE_DIR", default_value = DEFAULT_SAVE_DIR)]
    pub save_dir: PathBuf,

    /// Seconds between status refresh passes.
    #[arg(
        long,
        env = "CAPSTAN_REFRESH_INTERVAL_SECS",
        default_value_t = DEFAULT_REFRESH_INTERVAL_SECS
    )]
    pub refresh_interval_secs: u64,

    /// Milliseconds between alert queue drains.
    #[arg(
        long,
        env = "CAPSTAN_ALERT_INTERVAL_MS",
        default_value_t = DEFAULT_ALERT_INTERVAL_MS
    )]
    pub alert_interval_ms: u64,

    /// Seconds granted to in-flight stops during shutdown.
    #[arg(
        long,
        env = "CAPSTAN_SHUTDOWN_GRACE_SECS",
        default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS
    )]
    pub shutdown_grace_secs: u64,

    /// Log verbosity filter, for example `info` or `capstan_core=debug`.
    #[arg(long, env = "CAPSTAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format; inferred from the build when omitted.
    #[arg(long, env = "CAPSTAN_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Torrent descriptors to register at startup.
    #[arg(long = "torrent", value_name = "FILE")]
    pub torrents: Vec<PathBuf>,
}

impl AppProfile {
    /// Check field combinations the argument parser cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] when an interval is zero.
    pub fn validate(&self) -> AppResult<()> {
        if self.refresh_interval_secs == 0 {
            return Err(AppError::InvalidConfig {
                field: "refresh_interval_secs",
                reason: "must be positive",
                value: Some(self.refresh_interval_secs.to_string()),
            });
        }
        if self.alert_interval_ms == 0 {
            return Err(AppError::InvalidConfig {
                field: "alert_interval_ms",
                reason: "must be positive",
                value: Some(self.alert_interval_ms.to_string()),
            });
        }
        Ok(())
    }

    /// Interval between status refresh passes.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Interval between alert queue drains.
    #[must_use]
    pub const fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }

    /// Grace period granted to in-flight stops during shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Logging configuration derived from the profile.
    #[must_use]
    pub fn logging(&self) -> LoggingConfig<'_> {
        LoggingConfig {
            level: &self.log_level,
            format: self
                .log_format
                .map_or_else(LogFormat::infer, LogFormatArg::resolve),
        }
    }
}

/// Command-line selector for the log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Newline-delimited JSON records.
    Json,
    /// Human-readable terminal output.
    Pretty,
}

impl LogFormatArg {
    const fn resolve(self) -> LogFormat {
        match self {
            Self::Json => LogFormat::Json,
            Self::Pretty => LogFormat::Pretty,
        }
    }
}
