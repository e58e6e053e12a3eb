use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded now-playing dictionary. Every field is optional because players
/// publish whatever subset they like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub elapsed: Option<f64>,
    pub playback_rate: Option<f64>,
    /// Length of the artwork payload in bytes, if any was attached.
    pub artwork_bytes: Option<usize>,
}

impl NowPlayingInfo {
    /// Identity used for track-change detection. Position and rate are not part of it.
    pub fn track_key(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        (
            self.title.as_deref(),
            self.artist.as_deref(),
            self.album.as_deref(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackState {
    pub fn from_info(info: Option<&NowPlayingInfo>) -> Self {
        match info {
            None => PlaybackState::Stopped,
            Some(info) if info.playback_rate.is_some_and(|rate| rate > 0.0) => {
                PlaybackState::Playing
            }
            Some(_) => PlaybackState::Paused,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    #[serde(default)]
    pub has_artwork: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_bytes: Option<usize>,
}

impl From<&NowPlayingInfo> for TrackInfo {
    fn from(info: &NowPlayingInfo) -> Self {
        Self {
            title: info.title.clone(),
            artist: info.artist.clone(),
            album: info.album.clone(),
            duration: info.duration,
            elapsed: info.elapsed,
            playback_rate: info.playback_rate,
            has_artwork: info.artwork_bytes.is_some_and(|len| len > 0),
            artwork_bytes: info.artwork_bytes,
        }
    }
}

/// What a now-playing source reports to the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceUpdate {
    InfoChanged {
        info: Option<NowPlayingInfo>,
        app_name: Option<String>,
    },
    ApplicationChanged {
        app_name: Option<String>,
        bundle_id: Option<String>,
    },
    QueueChanged,
}

/// One line on the event socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MediaEvent {
    NowPlayingInfoChanged {
        timestamp: DateTime<Utc>,
        event_number: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bundle_id: Option<String>,
        playback_state: PlaybackState,
        track_changed: bool,
        track_info: TrackInfo,
    },
    ApplicationChanged {
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bundle_id: Option<String>,
        playback_state: PlaybackState,
    },
    PlaybackQueueChanged {
        timestamp: DateTime<Utc>,
    },
    Status {
        timestamp: DateTime<Utc>,
        started_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bundle_id: Option<String>,
        playback_state: PlaybackState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_info: Option<TrackInfo>,
        clients: usize,
        events_published: u64,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl MediaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::NowPlayingInfoChanged { .. } => "now_playing_info_changed",
            MediaEvent::ApplicationChanged { .. } => "application_changed",
            MediaEvent::PlaybackQueueChanged { .. } => "playback_queue_changed",
            MediaEvent::Status { .. } => "status",
            MediaEvent::Pong { .. } => "pong",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MediaEvent::NowPlayingInfoChanged { timestamp, .. }
            | MediaEvent::ApplicationChanged { timestamp, .. }
            | MediaEvent::PlaybackQueueChanged { timestamp }
            | MediaEvent::Status { timestamp, .. }
            | MediaEvent::Pong { timestamp } => *timestamp,
        }
    }

    /// Replies go to a single client; everything else is broadcast.
    pub fn is_reply(&self) -> bool {
        matches!(self, MediaEvent::Status { .. } | MediaEvent::Pong { .. })
    }
}

/// Requests a client may write to the socket, one JSON value per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRequest {
    GetStatus,
    Ping,
    Shutdown,
}

pub fn format_seconds(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let minutes = total / 60;
    let secs = total % 60;
    format!("{minutes}:{secs:02}")
}
