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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint that parses the runtime profile and launches the
//! Capstan daemon.

use clap::Parser;

use capstan_app::{AppProfile, AppResult, run_app};

/// Parses the profile and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app(AppProfile::parse()).await
}
