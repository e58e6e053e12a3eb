use anyhow::{Context, Result};
use interprocess::TryClone;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ipc::EventClient;
use crate::models::{ClientRequest, MediaEvent, SourceUpdate};
use crate::monitor::NowPlayingMonitor;

pub mod hub;
pub mod nowplaying;

use hub::{ClientId, Hub};
use nowplaying::NowPlayingSource;

pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    /// Runs with the platform now-playing source. Blocks until shutdown.
    pub fn run(&self) -> Result<()> {
        let source = nowplaying::platform_source(&self.config)?;
        self.run_with_source(source)
    }

    pub fn run_with_source(&self, mut source: Box<dyn NowPlayingSource>) -> Result<()> {
        use interprocess::local_socket::prelude::*;
        use interprocess::local_socket::{GenericFilePath, ListenerOptions};

        self.config.ensure_dirs()?;
        let socket_path = self.config.socket_path().to_path_buf();

        // Remove stale socket
        if socket_path.exists() {
            if EventClient::is_daemon_running(&socket_path) {
                anyhow::bail!("Another daemon is already listening on {}", socket_path.display());
            }
            fs::remove_file(&socket_path)?;
        }

        // Create listener
        let name = socket_path.as_os_str().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| "Failed to create socket listener")?;

        // Write PID file once the socket is ours
        let pid_path = self.config.pid_path().to_path_buf();
        if let Err(e) = fs::write(&pid_path, std::process::id().to_string()) {
            drop(listener);
            let _ = fs::remove_file(&socket_path);
            return Err(e)
                .with_context(|| format!("Failed to write PID file {}", pid_path.display()));
        }

        info!("Daemon started, publishing events on {}", socket_path.display());

        let hub = Arc::new(Hub::new(NowPlayingMonitor::new(self.config.events.dedupe)));
        let running = Arc::new(AtomicBool::new(true));
        let (update_tx, update_rx) = mpsc::channel();

        // Spawn event thread
        let event_hub = Arc::clone(&hub);
        let event_running = Arc::clone(&running);
        let event_thread = thread::spawn(move || {
            run_event_thread(update_rx, event_hub, event_running);
        });

        // Spawn accept thread
        let accept_hub = Arc::clone(&hub);
        let accept_running = Arc::clone(&running);
        let accept_socket = socket_path.clone();
        let accept_thread = thread::spawn(move || {
            while accept_running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok(conn) => {
                        if !accept_running.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) =
                            register_connection(conn, &accept_hub, &accept_running, &accept_socket)
                        {
                            error!("Connection error: {e}");
                        }
                    }
                    Err(e) => {
                        if accept_running.load(Ordering::SeqCst) {
                            error!("Accept error: {e}");
                        }
                    }
                }
            }
        });

        // The now-playing source owns the main thread until shutdown
        let source_result = source.run(update_tx, Arc::clone(&running));
        if let Err(e) = &source_result {
            error!("Now-playing source failed: {e}");
        }

        running.store(false, Ordering::SeqCst);
        wake_listener(&socket_path);
        let _ = accept_thread.join();
        let _ = event_thread.join();

        // Cleanup
        let _ = fs::remove_file(&socket_path);
        let _ = fs::remove_file(&pid_path);

        info!(
            "Daemon stopped after publishing {} events",
            hub.events_published()
        );
        source_result
    }

    pub fn start_detached(config: &Config, config_file: Option<&Path>) -> Result<()> {
        use std::process::Command;

        let socket_path = config.socket_path();
        if socket_path.exists() {
            if EventClient::is_daemon_running(socket_path) {
                anyhow::bail!("Daemon is already running");
            }
            fs::remove_file(socket_path)?;
        }

        let exe = std::env::current_exe()?;
        let mut command = Command::new(&exe);
        if let Some(file) = config_file {
            command.arg("--config").arg(file);
        }
        command
            .arg("--socket")
            .arg(socket_path)
            .arg("daemon")
            .arg("run")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().with_context(|| "Failed to start daemon")?;

        for _ in 0..50 {
            if socket_path.exists() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }

        anyhow::bail!("Daemon failed to start")
    }

    pub fn stop(config: &Config) -> Result<()> {
        let socket_path = config.socket_path();
        if EventClient::is_daemon_running(socket_path) {
            EventClient::connect(socket_path)?.shutdown()?;
            for _ in 0..50 {
                if !socket_path.exists() {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(100));
            }
            anyhow::bail!("Daemon did not shut down");
        }
        Ok(())
    }

    pub fn is_running(config: &Config) -> bool {
        EventClient::is_daemon_running(config.socket_path())
    }

    /// PID recorded by a running daemon, if the file exists and parses.
    pub fn pid(config: &Config) -> Option<u32> {
        fs::read_to_string(config.pid_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

fn run_event_thread(rx: Receiver<SourceUpdate>, hub: Arc<Hub>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(update) => match hub.publish(update) {
                Ok(Some(event)) => {
                    debug!("Published {} to {} clients", event.name(), hub.client_count());
                }
                Ok(None) => {}
                Err(e) => error!("Failed to publish event: {e}"),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Adds the connection to the hub and serves its requests on a separate thread.
fn register_connection(
    conn: interprocess::local_socket::Stream,
    hub: &Arc<Hub>,
    running: &Arc<AtomicBool>,
    socket_path: &Path,
) -> Result<()> {
    let writer = conn.try_clone()?;
    let id = hub.add_client(Box::new(writer))?;

    let hub = Arc::clone(hub);
    let running = Arc::clone(running);
    let socket_path = socket_path.to_path_buf();
    thread::spawn(move || {
        if let Err(e) = serve_requests(conn, id, &hub, &running, &socket_path) {
            debug!("Client {id} reader stopped: {e}");
        }
        hub.remove_client(id);
    });

    Ok(())
}

fn serve_requests(
    conn: interprocess::local_socket::Stream,
    id: ClientId,
    hub: &Hub,
    running: &AtomicBool,
    socket_path: &Path,
) -> Result<()> {
    let reader = BufReader::new(conn);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: ClientRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed request from client {id}: {e}");
                continue;
            }
        };

        match request {
            ClientRequest::GetStatus => hub.send_to(id, &hub.status())?,
            ClientRequest::Ping => hub.send_to(
                id,
                &MediaEvent::Pong {
                    timestamp: chrono::Utc::now(),
                },
            )?,
            ClientRequest::Shutdown => {
                info!("Shutdown requested by client {id}");
                running.store(false, Ordering::SeqCst);
                wake_listener(socket_path);
                break;
            }
        }
    }

    Ok(())
}

/// Unblocks a pending `accept` so the accept loop can observe shutdown.
fn wake_listener(socket_path: &Path) {
    use interprocess::local_socket::prelude::*;
    use interprocess::local_socket::GenericFilePath;

    if let Ok(name) = socket_path.as_os_str().to_fs_name::<GenericFilePath>() {
        let _ = interprocess::local_socket::Stream::connect(name);
    }
}
