use serde::{Deserialize, Serialize};

/// One reading of the media player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingData {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Track length in seconds
    pub duration: Option<f64>,
    /// Playback position in seconds
    pub elapsed: Option<f64>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub state: PlaybackState,
}

impl NowPlayingData {
    /// A reading with no track attached (player idle)
    #[cfg(test)]
    pub fn idle(state: PlaybackState) -> Self {
        Self {
            name: None,
            artist: None,
            album: None,
            duration: None,
            elapsed: None,
            genre: None,
            year: None,
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

/// What the presence indicator is currently showing, as far as we know
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayState {
    /// Nothing sent yet on this link
    Unknown,
    Cleared,
    Track(String),
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::Unknown
    }
}
