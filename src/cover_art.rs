//! Album artwork lookup via the iTunes search API

use parking_lot::Mutex;
use std::time::Duration;

const SEARCH_URL: &str = "https://itunes.apple.com/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub result_count: u32,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    pub artwork_url_100: Option<String>,
}

/// Swap the thumbnail size in an artwork URL for the large variant
pub fn upgrade_artwork_url(url: &str) -> String {
    url.replace("100x100", "600x600")
}

/// First result's artwork, upgraded to the large variant
pub fn first_artwork(response: &SearchResponse) -> Option<String> {
    if response.result_count == 0 {
        return None;
    }
    response
        .results
        .first()
        .and_then(|r| r.artwork_url_100.as_deref())
        .filter(|url| !url.is_empty())
        .map(upgrade_artwork_url)
}

type CacheEntry = ((String, String), Option<String>);

/// Looks up cover art, remembering the answer for the last album asked about
pub struct CoverArt {
    http: reqwest::blocking::Client,
    last: Mutex<Option<CacheEntry>>,
}

impl CoverArt {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            last: Mutex::new(None),
        })
    }

    /// Artwork URL for an album, or `None` if unknown. Never fails.
    pub fn lookup(&self, artist: Option<&str>, album: Option<&str>) -> Option<String> {
        let artist = artist.map(str::trim).filter(|s| !s.is_empty())?;
        let album = album.map(str::trim).filter(|s| !s.is_empty())?;
        let key = (artist.to_string(), album.to_string());

        if let Some((cached_key, url)) = self.last.lock().as_ref() {
            if *cached_key == key {
                return url.clone();
            }
        }

        let url = self.search(artist, album);
        log::debug!("Cover art for {} - {}: {:?}", artist, album, url);
        *self.last.lock() = Some((key, url.clone()));
        url
    }

    fn search(&self, artist: &str, album: &str) -> Option<String> {
        let term = format!("{} {}", artist, album);
        let response = self
            .http
            .get(SEARCH_URL)
            .query(&[("term", term.as_str()), ("entity", "album")])
            .send()
            .and_then(|r| r.error_for_status());

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Cover art search failed: {}", e);
                return None;
            }
        };

        match response.json::<SearchResponse>() {
            Ok(body) => first_artwork(&body),
            Err(e) => {
                log::debug!("Cover art response unreadable: {}", e);
                None
            }
        }
    }
}
