#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Capstan daemon wiring.
//!
//! Layout: `bootstrap.rs` (assembly and shutdown sequencing), `profile.rs`
//! (command-line configuration), `service.rs` (name-keyed torrent
//! operations), `pump.rs` (background tasks), `error.rs` (application
//! errors).

/// Service assembly and shutdown sequencing.
pub mod bootstrap;
/// Application-level error type.
pub mod error;
/// Command-line and environment configuration.
pub mod profile;
/// Background tasks draining alerts and reporting status.
pub mod pump;
/// Name-keyed façade over the torrent control layer.
pub mod service;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use profile::AppProfile;
pub use service::TorrentService;
