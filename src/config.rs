use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::media::PlayerKind;
use crate::rpc::ActivityType;

/// Application id registered with the chat application
pub const DEFAULT_CLIENT_ID: &str = "1411022045910929539";

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Runtime settings, read from `NOWPLAYING_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub client_id: String,
    pub interval: Duration,
    /// Upper bound for a single media player query
    pub query_timeout: Duration,
    pub cover_art: bool,
    /// `None` picks the platform's default player
    pub player: Option<PlayerKind>,
    pub activity_type: ActivityType,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let client_id = get("NOWPLAYING_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let interval_ms = match get("NOWPLAYING_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("NOWPLAYING_INTERVAL_MS is not a number: {}", raw))?,
            None => DEFAULT_INTERVAL_MS,
        };
        if interval_ms == 0 {
            bail!("NOWPLAYING_INTERVAL_MS must be greater than zero");
        }

        let query_timeout_ms = match get("NOWPLAYING_QUERY_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("NOWPLAYING_QUERY_TIMEOUT_MS is not a number: {}", raw))?,
            None => interval_ms,
        };

        let cover_art = match get("NOWPLAYING_COVER_ART") {
            Some(raw) => parse_flag(&raw)
                .with_context(|| format!("NOWPLAYING_COVER_ART is not a boolean: {}", raw))?,
            None => true,
        };

        let player = get("NOWPLAYING_PLAYER")
            .map(|raw| raw.parse::<PlayerKind>().map_err(anyhow::Error::msg))
            .transpose()
            .context("Invalid NOWPLAYING_PLAYER")?;

        let activity_type = get("NOWPLAYING_ACTIVITY_TYPE")
            .map(|raw| raw.parse::<ActivityType>().map_err(anyhow::Error::msg))
            .transpose()
            .context("Invalid NOWPLAYING_ACTIVITY_TYPE")?
            .unwrap_or(ActivityType::Listening);

        Ok(Self {
            client_id,
            interval: Duration::from_millis(interval_ms),
            query_timeout: Duration::from_millis(query_timeout_ms),
            cover_art,
            player,
            activity_type,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
