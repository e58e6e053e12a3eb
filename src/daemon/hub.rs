use anyhow::Result;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use tracing::{debug, warn};

use crate::models::{MediaEvent, SourceUpdate};
use crate::monitor::NowPlayingMonitor;

pub type ClientId = u64;

/// Lines a client may fall behind by before it is disconnected.
pub const CLIENT_BACKLOG: usize = 64;

struct Client {
    id: ClientId,
    lines: SyncSender<Vec<u8>>,
}

/// Connected clients plus the monitor whose events they receive.
///
/// Lock order is always `clients` then `monitor`. Socket writes happen on one
/// writer thread per client, never under either lock.
pub struct Hub {
    clients: Mutex<Vec<Client>>,
    monitor: Mutex<NowPlayingMonitor>,
    next_id: AtomicU64,
    published: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode(event: &MediaEvent) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

fn spawn_writer(id: ClientId, mut writer: Box<dyn Write + Send>) -> SyncSender<Vec<u8>> {
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(CLIENT_BACKLOG);
    thread::spawn(move || {
        for line in rx {
            if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
                debug!("Client {id} writer stopped: {e}");
                break;
            }
        }
    });
    tx
}

impl Hub {
    pub fn new(monitor: NowPlayingMonitor) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            monitor: Mutex::new(monitor),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Registers a client and queues the latest now-playing snapshot, if any.
    pub fn add_client(&self, writer: Box<dyn Write + Send>) -> Result<ClientId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let lines = spawn_writer(id, writer);

        // Holding `clients` keeps publishes out until the client is in the list,
        // so it sees every event after its snapshot exactly once.
        let mut clients = lock(&self.clients);
        if let Some(line) = lock(&self.monitor).snapshot().map(encode).transpose()? {
            // A fresh channel has room; failure means the writer already died.
            if lines.try_send(line).is_err() {
                anyhow::bail!("Client {id} closed before registration");
            }
        }
        clients.push(Client { id, lines });

        debug!("Client {id} connected");
        Ok(id)
    }

    pub fn remove_client(&self, id: ClientId) {
        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|c| c.id != id);
        if clients.len() != before {
            debug!("Client {id} disconnected");
        }
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Feeds an update through the monitor and broadcasts the resulting event.
    pub fn publish(&self, update: SourceUpdate) -> Result<Option<MediaEvent>> {
        let mut clients = lock(&self.clients);
        let event = lock(&self.monitor).apply(update);
        if let Some(ref event) = event {
            self.broadcast(&mut clients, event)?;
        }
        Ok(event)
    }

    /// Queues one line for every client. Clients that are gone or too far
    /// behind are dropped. Called with the clients lock held.
    fn broadcast(&self, clients: &mut Vec<Client>, event: &MediaEvent) -> Result<usize> {
        let line = encode(event)?;
        self.published.fetch_add(1, Ordering::SeqCst);

        clients.retain(|client| match client.lines.try_send(line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Dropping client {}: more than {CLIENT_BACKLOG} lines behind", client.id);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Dropping client {}: connection closed", client.id);
                false
            }
        });

        Ok(clients.len())
    }

    /// Queues a reply for one client only.
    pub fn send_to(&self, id: ClientId, event: &MediaEvent) -> Result<()> {
        let line = encode(event)?;
        let clients = lock(&self.clients);
        if let Some(client) = clients.iter().find(|c| c.id == id) {
            if let Err(e) = client.lines.try_send(line) {
                warn!("Reply to client {id} not delivered: {e}");
            }
        }
        Ok(())
    }

    pub fn status(&self) -> MediaEvent {
        let clients = lock(&self.clients);
        let count = clients.len();
        lock(&self.monitor).status(count, self.events_published())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NowPlayingInfo;
    use std::io;
    use std::sync::Arc;
    use std::sync::mpsc::{Receiver, Sender};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }

        /// Waits for the writer thread to deliver `count` lines.
        fn wait_for(&self, count: usize) -> Vec<serde_json::Value> {
            for _ in 0..200 {
                let lines = self.lines();
                if lines.len() >= count {
                    return lines;
                }
                thread::sleep(Duration::from_millis(10));
            }
            self.lines()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A consumer that stopped reading: every write blocks until the test ends.
    struct Stalled(Receiver<()>);

    impl Write for Stalled {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn track(title: &str) -> SourceUpdate {
        SourceUpdate::InfoChanged {
            info: Some(NowPlayingInfo {
                title: Some(title.to_string()),
                playback_rate: Some(1.0),
                ..Default::default()
            }),
            app_name: Some("Music".to_string()),
        }
    }

    #[test]
    fn test_broadcast_reaches_all_clients() {
        let hub = Hub::new(NowPlayingMonitor::new(true));
        let a = SharedBuffer::default();
        let b = SharedBuffer::default();
        hub.add_client(Box::new(a.clone())).unwrap();
        hub.add_client(Box::new(b.clone())).unwrap();

        hub.publish(track("One")).unwrap();
        hub.publish(SourceUpdate::QueueChanged).unwrap();

        for buffer in [&a, &b] {
            let lines = buffer.wait_for(2);
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[0]["event_type"], "now_playing_info_changed");
            assert_eq!(lines[0]["track_info"]["title"], "One");
            assert_eq!(lines[1]["event_type"], "playback_queue_changed");
        }
        assert_eq!(hub.events_published(), 2);
    }

    #[test]
    fn test_late_client_gets_snapshot() {
        let hub = Hub::new(NowPlayingMonitor::new(true));
        hub.publish(track("One")).unwrap();
        hub.publish(track("Two")).unwrap();

        let late = SharedBuffer::default();
        hub.add_client(Box::new(late.clone())).unwrap();

        let lines = late.wait_for(1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event_number"], 2);
        assert_eq!(lines[0]["track_info"]["title"], "Two");
    }

    #[test]
    fn test_failed_clients_are_dropped() {
        let hub = Hub::new(NowPlayingMonitor::new(true));
        let good = SharedBuffer::default();
        hub.add_client(Box::new(good.clone())).unwrap();
        hub.add_client(Box::new(BrokenPipe)).unwrap();
        assert_eq!(hub.client_count(), 2);

        // The broken writer exits on its first line; the next broadcast notices.
        for _ in 0..100 {
            hub.publish(SourceUpdate::QueueChanged).unwrap();
            if hub.client_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(hub.client_count(), 1);
        assert!(!good.wait_for(1).is_empty());
    }

    #[test]
    fn test_stalled_client_does_not_block_others() {
        let hub = Arc::new(Hub::new(NowPlayingMonitor::new(true)));
        let good = SharedBuffer::default();
        let (release, stalled_rx): (Sender<()>, Receiver<()>) = mpsc::channel();
        hub.add_client(Box::new(good.clone())).unwrap();
        hub.add_client(Box::new(Stalled(stalled_rx))).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let worker_hub = Arc::clone(&hub);
        thread::spawn(move || {
            for _ in 0..CLIENT_BACKLOG + 2 {
                worker_hub.publish(SourceUpdate::QueueChanged).unwrap();
            }
            let _ = done_tx.send(worker_hub.status());
        });

        let status = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("publishing blocked on a stalled client");
        match status {
            MediaEvent::Status { clients, .. } => assert_eq!(clients, 1),
            other => panic!("unexpected event {}", other.name()),
        }
        assert_eq!(good.wait_for(CLIENT_BACKLOG + 2).len(), CLIENT_BACKLOG + 2);

        drop(release);
    }

    #[test]
    fn test_joining_during_publishes_sees_each_event_once() {
        const EVENTS: u64 = 50;

        let hub = Arc::new(Hub::new(NowPlayingMonitor::new(true)));
        let publisher_hub = Arc::clone(&hub);
        let publisher = thread::spawn(move || {
            for n in 0..EVENTS {
                publisher_hub.publish(track(&format!("Track {n}"))).unwrap();
            }
        });

        let mut buffers = Vec::new();
        for _ in 0..20 {
            let buffer = SharedBuffer::default();
            hub.add_client(Box::new(buffer.clone())).unwrap();
            buffers.push(buffer);
            thread::sleep(Duration::from_millis(1));
        }
        publisher.join().unwrap();

        for buffer in &buffers {
            let mut lines = buffer.lines();
            for _ in 0..200 {
                if lines.last().is_some_and(|l| l["event_number"] == EVENTS) {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
                lines = buffer.lines();
            }

            let numbers: Vec<u64> = lines
                .iter()
                .map(|l| l["event_number"].as_u64().unwrap())
                .collect();
            let Some(&first) = numbers.first() else {
                continue;
            };
            let expected: Vec<u64> = (first..=EVENTS).collect();
            assert_eq!(numbers, expected);
        }
    }

    #[test]
    fn test_send_to_targets_one_client() {
        let hub = Hub::new(NowPlayingMonitor::new(true));
        let a = SharedBuffer::default();
        let b = SharedBuffer::default();
        let id = hub.add_client(Box::new(a.clone())).unwrap();
        hub.add_client(Box::new(b.clone())).unwrap();

        hub.send_to(id, &hub.status()).unwrap();

        let lines = a.wait_for(1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event_type"], "status");
        assert_eq!(lines[0]["clients"], 2);
        assert!(b.lines().is_empty());

        hub.remove_client(id);
        assert_eq!(hub.client_count(), 1);
    }
}
