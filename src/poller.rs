use std::time::{Duration, SystemTime};

use crate::cover_art::CoverArt;
use crate::media::MediaSource;
use crate::rpc::{Activity, PresenceError};
use crate::state::SharedClient;
use crate::types::{DisplayState, NowPlayingData, PlaybackState};

const TITLE_SEPARATOR: &str = " - ";

/// Split an "Artist - Title" track name on its first separator.
/// Names without one are all title.
pub fn split_track_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(TITLE_SEPARATOR) {
        Some((artist, title)) => (Some(artist), title),
        None => (None, name),
    }
}

/// Activity for a playing track plus a one-line summary for logs.
/// `start` is backdated by the elapsed time so the host shows progress.
pub fn build_activity(
    track: &NowPlayingData,
    cover: Option<String>,
    now: SystemTime,
) -> (Activity, String) {
    let (title, artist) = track_labels(track);

    let elapsed = track.elapsed.unwrap_or(0.0).max(0.0).trunc();
    let started = now
        .checked_sub(Duration::from_secs(elapsed as u64))
        .unwrap_or(now);

    let mut activity = Activity::new()
        .details(title.unwrap_or("Unknown Song"))
        .state(artist.unwrap_or("Unknown Artist"))
        .start_at(started)
        .large_text(track.album.as_deref().unwrap_or("Unknown Album"));
    activity.large_image = cover;

    let summary = format!(
        "{} by {}",
        title.unwrap_or("Unknown Song"),
        artist.unwrap_or("Unknown Artist")
    );
    (activity, summary)
}

/// Display title and artist, preferring an artist embedded in the name
fn track_labels(track: &NowPlayingData) -> (Option<&str>, Option<&str>) {
    match track.name.as_deref() {
        Some(name) => {
            let (embedded_artist, title) = split_track_name(name);
            (Some(title), embedded_artist.or(track.artist.as_deref()))
        }
        None => (None, track.artist.as_deref()),
    }
}

/// Drives one presence update per tick from the media source's readings.
///
/// Transport failures close the link; the next tick reconnects.
pub struct Poller {
    client: SharedClient,
    source: Box<dyn MediaSource>,
    cover_art: Option<CoverArt>,
    display: DisplayState,
}

impl Poller {
    pub fn new(
        client: SharedClient,
        source: Box<dyn MediaSource>,
        cover_art: Option<CoverArt>,
    ) -> Self {
        Self {
            client,
            source,
            cover_art,
            display: DisplayState::Unknown,
        }
    }

    #[cfg(test)]
    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn tick(&mut self) {
        if !self.ensure_connected() {
            return;
        }

        let playing = self
            .source
            .current_track()
            .filter(|track| track.state == PlaybackState::Playing);

        match playing {
            Some(track) => self.show(&track),
            None => self.hide(),
        }
    }

    fn ensure_connected(&mut self) -> bool {
        let mut client = self.client.lock();
        if client.is_ready() {
            return true;
        }

        log::info!("Reconnecting to presence host...");
        match client.connect() {
            Ok(_) => {
                self.display = DisplayState::Unknown;
                true
            }
            Err(e) => {
                log::warn!("Presence host unavailable: {}", e);
                false
            }
        }
    }

    fn show(&mut self, track: &NowPlayingData) {
        let (_, artist) = track_labels(track);
        let cover = self
            .cover_art
            .as_ref()
            .and_then(|c| c.lookup(artist, track.album.as_deref()));

        let (activity, summary) = build_activity(track, cover, SystemTime::now());
        log::debug!(
            "Track details: album={:?} genre={:?} year={:?} duration={:?}",
            track.album,
            track.genre,
            track.year,
            track.duration
        );

        if self.display == DisplayState::Track(summary.clone()) {
            log::debug!("Updating presence: {}", summary);
        } else {
            log::info!("Now playing on {}: {}", self.source.name(), summary);
        }

        let result = self.client.lock().update(&activity);
        self.settle(result.map(|_| DisplayState::Track(summary)));
    }

    fn hide(&mut self) {
        if self.display == DisplayState::Cleared {
            return;
        }

        log::info!("Nothing playing, clearing presence");
        let result = self.client.lock().clear();
        self.settle(result.map(|_| DisplayState::Cleared));
    }

    fn settle(&mut self, result: Result<DisplayState, PresenceError>) {
        match result {
            Ok(display) => self.display = display,
            Err(e) if e.is_transport() => {
                log::warn!("Presence link failed, will reconnect: {}", e);
                self.client.lock().close();
                self.display = DisplayState::Unknown;
            }
            Err(e) => {
                log::warn!("Presence update refused: {}", e);
            }
        }
    }
}
