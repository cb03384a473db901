//! Per-torrent lifecycle control for the Capstan daemon.
//!
//! The pieces fit together like this: a [`TorrentController`] owns the
//! policy and statistics for one torrent and drives it through a small
//! state machine whose transient states (`Pausing`, `Stopping`) resolve
//! only when the engine confirms through its alert queue. Controllers are
//! looked up by display name or on-disk filename through the
//! [`TorrentRegistry`], persist themselves as versioned JSON documents via
//! [`Stores`], and report everything noteworthy to the shared
//! [`capstan_events::EventBus`] instead of returning errors to callers.

pub mod controller;
pub mod details;
pub mod error;
pub mod registry;
pub mod settings;
pub mod store;
pub mod tracker;

pub use controller::{TorrentController, TorrentOptions};
pub use details::{FileDetail, PeerCounts, PeerDetail, TorrentDetails};
pub use error::{ControlError, ControlResult};
pub use registry::TorrentRegistry;
pub use settings::{StoredTorrent, StoredTorrentV1, StoredTorrentV2, TorrentSettings};
pub use store::Stores;
pub use tracker::{DurationTracker, TransferTracker};
