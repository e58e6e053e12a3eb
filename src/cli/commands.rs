use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::daemon::Daemon;
use crate::ipc::EventClient;
use crate::mediaremote::{self, NowPlayingQuery};
use crate::models::{MediaEvent, PlaybackState, TrackInfo, format_seconds};

pub struct App {
    pub config: Config,
    config_file: Option<PathBuf>,
}

impl App {
    pub fn new(config_file: Option<PathBuf>, socket: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::load(config_file.as_deref())?;
        if let Some(path) = socket {
            config.socket.path = path;
        }

        Ok(Self {
            config,
            config_file,
        })
    }

    fn client(&self) -> Result<EventClient> {
        if !Daemon::is_running(&self.config) {
            bail!("Daemon is not running. Start it with: media_listener daemon start");
        }
        EventClient::connect(self.config.socket_path())
    }

    pub fn watch(&self, json: bool) -> Result<()> {
        let mut client = self.client()?;
        println!("Connected to {}", self.config.socket_path().display());
        println!("Listening for media events...\n");

        for event in client.events() {
            match event {
                Ok(event) if json => println!("{}", serde_json::to_string(&event)?),
                Ok(event) => print_event(&event),
                Err(e) => eprintln!("Error parsing event: {e}"),
            }
        }

        println!("Connection closed by daemon");
        Ok(())
    }

    pub fn status(&self, json: bool) -> Result<()> {
        if !Daemon::is_running(&self.config) {
            println!("Daemon is not running.");
            return Ok(());
        }

        let status = self.client()?.status()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_status(&status);
        }

        Ok(())
    }

    pub fn now(&self, json: bool, timeout: u64) -> Result<()> {
        let query = mediaremote::query(Duration::from_secs(timeout))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&query)?);
        } else {
            print_query(&query);
        }

        Ok(())
    }

    pub fn daemon_start(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            println!("Daemon is already running.");
            return Ok(());
        }

        Daemon::start_detached(&self.config, self.config_file.as_deref())?;
        println!(
            "Daemon started, events on {}",
            self.config.socket_path().display()
        );

        Ok(())
    }

    pub fn daemon_stop(&self) -> Result<()> {
        if !Daemon::is_running(&self.config) {
            println!("Daemon is not running.");
            return Ok(());
        }

        Daemon::stop(&self.config)?;
        println!("Daemon stopped.");

        Ok(())
    }

    pub fn daemon_status(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            match Daemon::pid(&self.config) {
                Some(pid) => println!("Daemon is running (pid {pid})."),
                None => println!("Daemon is running."),
            }
        } else {
            println!("Daemon is not running.");
        }

        Ok(())
    }

    pub fn daemon_run(&self) -> Result<()> {
        let daemon = Daemon::new(self.config.clone())?;
        daemon.run().with_context(|| "Daemon exited with an error")
    }

    pub fn config_show(&self) -> Result<()> {
        print!("{}", self.config.to_toml()?);
        Ok(())
    }

    pub fn config_path(&self) -> Result<()> {
        let path = self.config_file.clone().unwrap_or_else(Config::config_path);
        println!("{}", path.display());
        Ok(())
    }
}

fn print_event(event: &MediaEvent) {
    println!("{}", "═".repeat(60));
    println!("Event: {}", event.name().to_uppercase());
    println!("Timestamp: {}", event.timestamp().to_rfc3339());

    match event {
        MediaEvent::NowPlayingInfoChanged {
            event_number,
            app_name,
            playback_state,
            track_changed,
            track_info,
            ..
        } => {
            println!("Event #: {event_number}");
            println!("App: {}", app_name.as_deref().unwrap_or("Unknown"));
            println!("State: {playback_state}");

            if *track_changed {
                println!("🎵 TRACK CHANGED");
            }

            print_track(track_info);
        }
        MediaEvent::ApplicationChanged {
            app_name,
            playback_state,
            ..
        } => {
            println!("New App: {}", app_name.as_deref().unwrap_or("Unknown"));
            println!("State: {playback_state}");
        }
        MediaEvent::PlaybackQueueChanged { .. } | MediaEvent::Pong { .. } => {}
        MediaEvent::Status { .. } => print_status(event),
    }

    println!();
}

fn print_track(track: &TrackInfo) {
    if *track == TrackInfo::default() {
        return;
    }

    println!("\nTrack Info:");
    if let Some(title) = &track.title {
        println!("  Title: {title}");
    }
    if let Some(artist) = &track.artist {
        println!("  Artist: {artist}");
    }
    if let Some(album) = &track.album {
        println!("  Album: {album}");
    }
    if let Some(duration) = track.duration {
        println!("  Duration: {}", format_seconds(duration));
    }
    if let Some(elapsed) = track.elapsed {
        println!("  Elapsed: {}", format_seconds(elapsed));
    }
    if track.has_artwork {
        println!("  Artwork: yes");
    }
}

fn print_status(status: &MediaEvent) {
    let MediaEvent::Status {
        started_at,
        app_name,
        playback_state,
        track_info,
        clients,
        events_published,
        ..
    } = status
    else {
        return;
    };

    match track_info {
        Some(track) if *playback_state != PlaybackState::Stopped => {
            let label = if *playback_state == PlaybackState::Playing {
                "Playing"
            } else {
                "Paused"
            };
            let title = track.title.as_deref().unwrap_or("Unknown title");
            match &track.artist {
                Some(artist) => println!("{label}: {title} by {artist}"),
                None => println!("{label}: {title}"),
            }
            if let (Some(elapsed), Some(duration)) = (track.elapsed, track.duration) {
                println!(
                    "Position: {} / {}",
                    format_seconds(elapsed),
                    format_seconds(duration)
                );
            }
        }
        _ => println!("Not playing"),
    }

    if let Some(app) = app_name {
        println!("App: {app}");
    }
    println!("Clients: {clients}");
    println!("Events published: {events_published}");
    println!("Up since: {}", started_at.to_rfc3339());
}

fn print_query(query: &NowPlayingQuery) {
    let state = PlaybackState::from_info(query.info.as_ref());
    println!("State: {state}");
    if let Some(app) = &query.app_name {
        println!("App: {app}");
    }
    if let Some(bundle_id) = &query.bundle_id {
        println!("Bundle: {bundle_id}");
    }

    match &query.info {
        Some(info) if !info.is_empty() => print_track(&TrackInfo::from(info)),
        _ => println!("Nothing is playing"),
    }
}
