use anyhow::{Context, Result};
use interprocess::TryClone;
use interprocess::local_socket::Stream;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ClientRequest, MediaEvent};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid event line: {source} (raw: {line})")]
    BadEvent {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Daemon closed the connection")]
    Closed,
    #[error("No reply from daemon within {0:?}")]
    Timeout(Duration),
}

/// How long a liveness check waits for `pong`.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// How long one-shot requests such as `status` wait for their reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Parses one NDJSON line from the event socket.
pub fn parse_event(line: &str) -> Result<MediaEvent, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|source| ProtocolError::BadEvent {
        line: line.trim().to_string(),
        source,
    })
}

/// Connection to the daemon's event socket.
pub struct EventClient {
    reader: BufReader<Stream>,
    writer: Stream,
}

impl EventClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        use interprocess::local_socket::GenericFilePath;
        use interprocess::local_socket::prelude::*;

        let socket_path = socket_path.as_ref();
        let name = socket_path
            .as_os_str()
            .to_fs_name::<GenericFilePath>()
            .with_context(|| "Invalid socket path")?;

        let conn = Stream::connect(name).with_context(|| {
            format!(
                "Failed to connect to daemon at {}",
                socket_path.display()
            )
        })?;

        let writer = conn;
        let reader = BufReader::new(writer.try_clone()?);

        Ok(Self { reader, writer })
    }

    pub fn is_daemon_running(socket_path: impl AsRef<Path>) -> bool {
        let socket_path = socket_path.as_ref();
        socket_path.exists()
            && Self::connect(socket_path)
                .and_then(|client| client.request_within(ClientRequest::Ping, PING_TIMEOUT))
                .is_ok_and(|event| matches!(event, MediaEvent::Pong { .. }))
    }

    fn send(&mut self, request: ClientRequest) -> Result<()> {
        let msg = serde_json::to_string(&request)?;
        writeln!(self.writer, "{msg}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Next event from the socket. `Ok(None)` means the daemon hung up.
    pub fn next_event(&mut self) -> Result<Option<MediaEvent>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(parse_event(&line)?));
        }
    }

    /// Sends a request and returns its reply, skipping broadcasts that arrive first.
    pub fn request(&mut self, request: ClientRequest) -> Result<MediaEvent> {
        self.send(request)?;
        loop {
            match self.next_event() {
                Ok(Some(event)) if event.is_reply() => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(ProtocolError::Closed.into()),
                Err(e) if e.is::<ProtocolError>() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `request`, but gives up after `timeout`. The connection is consumed
    /// because a reply may still be in flight when the wait ends.
    pub fn request_within(self, request: ClientRequest, timeout: Duration) -> Result<MediaEvent> {
        let (tx, rx) = mpsc::channel();
        let mut client = self;
        thread::spawn(move || {
            let _ = tx.send(client.request(request));
        });

        match rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ProtocolError::Timeout(timeout).into()),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ProtocolError::Closed.into()),
        }
    }

    pub fn status(self) -> Result<MediaEvent> {
        self.request_within(ClientRequest::GetStatus, REQUEST_TIMEOUT)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.send(ClientRequest::Shutdown)
    }

    /// Iterator over incoming events. Malformed lines are yielded as errors
    /// without ending the stream.
    pub fn events(&mut self) -> Events<'_> {
        Events { client: self }
    }
}

pub struct Events<'a> {
    client: &'a mut EventClient,
}

impl Iterator for Events<'_> {
    type Item = Result<MediaEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.client.next_event().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaybackState;

    #[test]
    fn test_parse_application_changed() {
        let event = parse_event(
            r#"{"event_type":"application_changed","timestamp":"2024-05-01T12:00:00Z","app_name":"Spotify","playback_state":"paused"}"#,
        )
        .unwrap();

        match event {
            MediaEvent::ApplicationChanged {
                app_name,
                bundle_id,
                playback_state,
                ..
            } => {
                assert_eq!(app_name.as_deref(), Some("Spotify"));
                assert!(bundle_id.is_none());
                assert_eq!(playback_state, PlaybackState::Paused);
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn test_parse_info_without_optional_fields() {
        let event = parse_event(
            "{\"event_type\":\"now_playing_info_changed\",\"timestamp\":\"2024-05-01T12:00:00Z\",\
             \"event_number\":1,\"playback_state\":\"stopped\",\"track_changed\":false,\"track_info\":{}}\n",
        )
        .unwrap();
        assert_eq!(event.name(), "now_playing_info_changed");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_event("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::BadEvent { .. }));
        assert!(err.to_string().contains("not json"));

        let unknown = parse_event(r#"{"event_type":"volume_changed","timestamp":"2024-05-01T12:00:00Z"}"#);
        assert!(unknown.is_err());
    }

    fn listen(path: &Path) -> interprocess::local_socket::Listener {
        use interprocess::local_socket::prelude::*;
        use interprocess::local_socket::{GenericFilePath, ListenerOptions};

        let name = path.as_os_str().to_fs_name::<GenericFilePath>().unwrap();
        ListenerOptions::new().name(name).create_sync().unwrap()
    }

    const INFO_LINE: &str = r#"{"event_type":"playback_queue_changed","timestamp":"2024-05-01T12:00:00Z"}"#;
    const PONG_LINE: &str = r#"{"event_type":"pong","timestamp":"2024-05-01T12:00:01Z"}"#;

    #[test]
    fn test_bad_lines_do_not_end_the_stream() {
        use interprocess::local_socket::traits::Listener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.sock");
        let listener = listen(&path);

        let server = thread::spawn(move || {
            let conn = listener.accept().unwrap();
            let mut reader = BufReader::new(conn.try_clone().unwrap());
            let mut writer = conn;
            write!(writer, "{INFO_LINE}\n{{broken\n{INFO_LINE}\n").unwrap();
            writer.flush().unwrap();

            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            assert_eq!(request.trim(), r#""Ping""#);
            write!(writer, "garbage\n{INFO_LINE}\n{PONG_LINE}\n").unwrap();
            writer.flush().unwrap();
        });

        let mut client = EventClient::connect(&path).unwrap();
        let mut events = client.events();
        assert!(matches!(
            events.next().unwrap().unwrap(),
            MediaEvent::PlaybackQueueChanged { .. }
        ));
        let err = events.next().unwrap().unwrap_err();
        assert!(err.is::<ProtocolError>());
        assert!(matches!(
            events.next().unwrap().unwrap(),
            MediaEvent::PlaybackQueueChanged { .. }
        ));
        drop(events);

        let reply = client.request(ClientRequest::Ping).unwrap();
        assert!(matches!(reply, MediaEvent::Pong { .. }));
        server.join().unwrap();
    }

    #[test]
    fn test_silent_listener_is_not_running() {
        use interprocess::local_socket::traits::Listener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = listen(&path);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // Accepts and holds the connection without ever answering.
        thread::spawn(move || {
            let conn = listener.accept();
            let _ = stop_rx.recv();
            drop(conn);
        });

        let (done_tx, done_rx) = mpsc::channel();
        let check_path = path.clone();
        thread::spawn(move || {
            let _ = done_tx.send(EventClient::is_daemon_running(&check_path));
        });

        let running = done_rx
            .recv_timeout(PING_TIMEOUT * 3)
            .expect("liveness check hung on a silent socket");
        assert!(!running);

        let client = EventClient::connect(&path).unwrap();
        let err = client
            .request_within(ClientRequest::GetStatus, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::Timeout(_))
        ));
        drop(stop_tx);
    }

    #[test]
    fn test_missing_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!EventClient::is_daemon_running(dir.path().join("none.sock")));
        assert!(EventClient::connect(dir.path().join("none.sock")).is_err());
    }
}
