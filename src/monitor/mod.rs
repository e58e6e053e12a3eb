use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{MediaEvent, NowPlayingInfo, PlaybackState, SourceUpdate, TrackInfo};

/// Turns raw source updates into numbered events.
#[derive(Debug)]
pub struct NowPlayingMonitor {
    dedupe: bool,
    started_at: DateTime<Utc>,
    info: Option<NowPlayingInfo>,
    has_info: bool,
    app_name: Option<String>,
    bundle_id: Option<String>,
    event_number: u64,
    last_info_event: Option<MediaEvent>,
}

impl NowPlayingMonitor {
    pub fn new(dedupe: bool) -> Self {
        Self {
            dedupe,
            started_at: Utc::now(),
            info: None,
            has_info: false,
            app_name: None,
            bundle_id: None,
            event_number: 0,
            last_info_event: None,
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_info(self.info.as_ref())
    }

    pub fn apply(&mut self, update: SourceUpdate) -> Option<MediaEvent> {
        match update {
            SourceUpdate::InfoChanged { info, app_name } => self.info_changed(info, app_name),
            SourceUpdate::ApplicationChanged {
                app_name,
                bundle_id,
            } => self.application_changed(app_name, bundle_id),
            SourceUpdate::QueueChanged => Some(MediaEvent::PlaybackQueueChanged {
                timestamp: Utc::now(),
            }),
        }
    }

    fn info_changed(
        &mut self,
        info: Option<NowPlayingInfo>,
        app_name: Option<String>,
    ) -> Option<MediaEvent> {
        let app_changed = app_name.is_some() && app_name != self.app_name;

        if self.dedupe && self.has_info && info == self.info && !app_changed {
            debug!("Dropping duplicate now-playing update");
            return None;
        }

        let previous_key = self
            .info
            .as_ref()
            .map(|i| i.track_key())
            .unwrap_or_default();
        let current_key = info.as_ref().map(|i| i.track_key()).unwrap_or_default();
        let track_changed = previous_key != current_key;

        if app_name.is_some() {
            self.app_name = app_name;
        }

        self.info = info;
        self.has_info = true;
        self.event_number += 1;

        let event = MediaEvent::NowPlayingInfoChanged {
            timestamp: Utc::now(),
            event_number: self.event_number,
            app_name: self.app_name.clone(),
            bundle_id: self.bundle_id.clone(),
            playback_state: self.playback_state(),
            track_changed,
            track_info: self.info.as_ref().map(TrackInfo::from).unwrap_or_default(),
        };

        self.last_info_event = Some(event.clone());
        Some(event)
    }

    fn application_changed(
        &mut self,
        app_name: Option<String>,
        bundle_id: Option<String>,
    ) -> Option<MediaEvent> {
        if app_name == self.app_name && bundle_id == self.bundle_id {
            return None;
        }

        self.app_name = app_name;
        self.bundle_id = bundle_id;

        Some(MediaEvent::ApplicationChanged {
            timestamp: Utc::now(),
            app_name: self.app_name.clone(),
            bundle_id: self.bundle_id.clone(),
            playback_state: self.playback_state(),
        })
    }

    /// Latest info event, replayed to clients that connect mid-session.
    pub fn snapshot(&self) -> Option<&MediaEvent> {
        self.last_info_event.as_ref()
    }

    pub fn status(&self, clients: usize, events_published: u64) -> MediaEvent {
        MediaEvent::Status {
            timestamp: Utc::now(),
            started_at: self.started_at,
            app_name: self.app_name.clone(),
            bundle_id: self.bundle_id.clone(),
            playback_state: self.playback_state(),
            track_info: self.info.as_ref().map(TrackInfo::from),
            clients,
            events_published,
        }
    }
}
