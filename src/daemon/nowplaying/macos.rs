use anyhow::Result;
use objc2_foundation::{NSDate, NSRunLoop};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{FetchOrder, NowPlayingSource};
use crate::mediaremote::{MediaRemote, Notification, NotificationObserver};
use crate::models::SourceUpdate;

/// Now-playing source backed by MediaRemote notifications.
pub struct MediaRemoteSource {
    remote: MediaRemote,
    pump_interval: Duration,
}

impl MediaRemoteSource {
    pub fn new(pump_interval: Duration) -> Self {
        Self {
            remote: MediaRemote::new(),
            pump_interval: pump_interval.max(Duration::from_millis(10)),
        }
    }
}

impl NowPlayingSource for MediaRemoteSource {
    fn run(&mut self, updates: Sender<SourceUpdate>, running: Arc<AtomicBool>) -> Result<()> {
        let fetcher = Fetcher {
            remote: self.remote.clone(),
            info_order: Arc::new(FetchOrder::default()),
            app_order: Arc::new(FetchOrder::default()),
        };
        fetcher.remote.register_notifications();

        let observers: Vec<NotificationObserver> = Notification::ALL
            .into_iter()
            .map(|notification| {
                let tx = updates.clone();
                let handler = fetcher.clone();
                fetcher.remote.observe(notification, move || {
                    debug!("Received {notification:?}");
                    match notification {
                        Notification::InfoDidChange => handler.fetch_info(tx.clone()),
                        Notification::ApplicationDidChange => handler.fetch_application(tx.clone()),
                        Notification::PlaybackQueueDidChange => {
                            let _ = tx.send(SourceUpdate::QueueChanged);
                        }
                    }
                })
            })
            .collect();

        info!("Registered for MediaRemote now-playing notifications");

        // Seed the monitor with whatever is playing right now.
        fetcher.fetch_info(updates.clone());
        fetcher.fetch_application(updates);

        while running.load(Ordering::SeqCst) {
            pump_run_loop(self.pump_interval);
        }

        drop(observers);
        fetcher.remote.unregister_notifications();
        info!("Unregistered from MediaRemote notifications");

        Ok(())
    }
}

/// Chains the getters behind each notification. Overlapping chains may finish
/// out of order; only the newest one's result is sent.
#[derive(Clone)]
struct Fetcher {
    remote: MediaRemote,
    info_order: Arc<FetchOrder>,
    app_order: Arc<FetchOrder>,
}

impl Fetcher {
    fn fetch_info(&self, tx: Sender<SourceUpdate>) {
        let ticket = self.info_order.begin();
        let order = Arc::clone(&self.info_order);
        let remote = self.remote.clone();
        self.remote.now_playing_info(move |info| {
            let tx = tx.clone();
            let order = Arc::clone(&order);
            remote.application_display_name(move |app_name| {
                if !order.accept(ticket) {
                    debug!("Dropping stale now-playing info #{ticket}");
                    return;
                }
                let _ = tx.send(SourceUpdate::InfoChanged {
                    info: info.clone(),
                    app_name,
                });
            });
        });
    }

    fn fetch_application(&self, tx: Sender<SourceUpdate>) {
        let ticket = self.app_order.begin();
        let order = Arc::clone(&self.app_order);
        let remote = self.remote.clone();
        self.remote.application_display_name(move |app_name| {
            let tx = tx.clone();
            let order = Arc::clone(&order);
            remote.now_playing_client(move |bundle_id| {
                if !order.accept(ticket) {
                    debug!("Dropping stale application #{ticket}");
                    return;
                }
                let _ = tx.send(SourceUpdate::ApplicationChanged {
                    app_name: app_name.clone(),
                    bundle_id,
                });
            });
        });
    }
}

/// Runs the current run loop for one slice. A run loop with no sources returns
/// immediately, so the rest of the slice is slept off.
fn pump_run_loop(slice: Duration) {
    let started = Instant::now();

    // SAFETY: both calls only touch the current thread's run loop.
    unsafe {
        let run_loop = NSRunLoop::currentRunLoop();
        let until = NSDate::dateWithTimeIntervalSinceNow(slice.as_secs_f64());
        run_loop.runUntilDate(&until);
    }

    if let Some(rest) = slice.checked_sub(started.elapsed()) {
        thread::sleep(rest);
    }
}
