//! # Design
//!
//! - Centralize application-level errors for bootstrap and service wiring.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use capstan_core::ControlError;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Torrent control operations failed.
    #[error("torrent control operation failed")]
    Control {
        /// Operation identifier.
        operation: &'static str,
        /// Source control error.
        source: ControlError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn control(operation: &'static str, source: ControlError) -> Self {
        Self::Control { operation, source }
    }

    pub(crate) fn telemetry(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Telemetry {
            operation,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::ControlError;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() {
        let control = AppError::control(
            "resume",
            ControlError::InvalidTorrent {
                identifier: "alpha".to_string(),
            },
        );
        assert!(matches!(control, AppError::Control { .. }));
        assert!(control.source().is_some());

        let telemetry = AppError::telemetry("init", anyhow::anyhow!("registry rejected collector"));
        assert!(matches!(telemetry, AppError::Telemetry { .. }));

        let io = AppError::Io {
            operation: "create state dir",
            path: Some(PathBuf::from("state")),
            source: io::Error::other("disk full"),
        };
        assert_eq!(io.to_string(), "io operation failed");
    }
}
