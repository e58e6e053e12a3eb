use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;

use crate::config::Config;
use crate::models::SourceUpdate;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::MediaRemoteSource;

/// Something that reports now-playing changes.
///
/// `run` blocks the calling thread until `running` is cleared.
pub trait NowPlayingSource {
    fn run(&mut self, updates: Sender<SourceUpdate>, running: Arc<AtomicBool>) -> Result<()>;
}

#[cfg(target_os = "macos")]
pub fn platform_source(config: &Config) -> Result<Box<dyn NowPlayingSource>> {
    Ok(Box::new(MediaRemoteSource::new(
        std::time::Duration::from_millis(config.daemon.pump_interval_ms),
    )))
}

#[cfg(not(target_os = "macos"))]
pub fn platform_source(_config: &Config) -> Result<Box<dyn NowPlayingSource>> {
    Err(crate::mediaremote::MediaRemoteError::Unsupported.into())
}

/// Sequences overlapping asynchronous fetches so that a slow, older reply
/// never overwrites a newer one.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Default)]
pub struct FetchOrder {
    issued: AtomicU64,
    delivered: AtomicU64,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl FetchOrder {
    /// Ticket for a fetch about to be issued. Tickets start at 1.
    pub fn begin(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True when `ticket` is newer than every result delivered so far.
    pub fn accept(&self, ticket: u64) -> bool {
        self.delivered.fetch_max(ticket, Ordering::SeqCst) < ticket
    }
}
