use anyhow::{bail, Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::{NowPlayingData, PlaybackState};

/// Separates fields in a helper's status line
const FIELD_SEPARATOR: char = '\u{1f}';

/// Printed by helpers when the player application isn't running
const NOT_RUNNING: &str = "not running";

const WAIT_INTERVAL: Duration = Duration::from_millis(20);

/// Source of "now playing" readings
pub trait MediaSource: Send {
    /// Returns the name of this source (for logging)
    fn name(&self) -> &'static str;

    /// Current player reading, or `None` when it can't be had right now.
    /// Never takes much longer than the source's query timeout.
    fn current_track(&self) -> Option<NowPlayingData>;
}

/// Media players we know how to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    /// Music.app via AppleScript (macOS)
    Music,
    /// iTunes via its COM automation object (Windows)
    ITunes,
    /// Any MPRIS player via `playerctl` (Linux)
    Playerctl,
}

impl PlayerKind {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            PlayerKind::Music
        } else if cfg!(windows) {
            PlayerKind::ITunes
        } else {
            PlayerKind::Playerctl
        }
    }
}

impl std::str::FromStr for PlayerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "music" | "apple-music" => Ok(PlayerKind::Music),
            "itunes" => Ok(PlayerKind::ITunes),
            "playerctl" | "mpris" => Ok(PlayerKind::Playerctl),
            other => Err(format!(
                "unknown player '{}' (expected music, itunes or playerctl)",
                other
            )),
        }
    }
}

/// How a helper reports duration and position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeUnit {
    Seconds,
    Microseconds,
}

impl TimeUnit {
    fn to_seconds(self, raw: f64) -> f64 {
        match self {
            TimeUnit::Seconds => raw,
            TimeUnit::Microseconds => raw / 1_000_000.0,
        }
    }
}

const MUSIC_SCRIPT: &str = r#"
if application "Music" is not running then return "not running"
tell application "Music"
    set sep to (ASCII character 31)
    set st to (player state as string)
    if st is "stopped" then return st
    set t to current track
    return st & sep & (name of t) & sep & (artist of t) & sep & (album of t) & sep & (duration of t) & sep & (player position) & sep & (genre of t) & sep & (year of t)
end tell
"#;

const ITUNES_SCRIPT: &str = r#"
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8
if (-not (Get-Process iTunes -ErrorAction SilentlyContinue)) { 'not running'; exit 0 }
$it = New-Object -ComObject iTunes.Application
$s = [char]31
$t = $it.CurrentTrack
if ($it.PlayerState -eq 1) { $st = 'playing' } elseif ($t -and $t.Name) { $st = 'paused' } else { $st = 'stopped' }
if (-not $t) { $st; exit 0 }
$st + $s + $t.Name + $s + $t.Artist + $s + $t.Album + $s + $t.Duration + $s + $it.PlayerPosition + $s + $t.Genre + $s + $t.Year
"#;

/// Queries a player by running a short-lived helper process that prints
/// one status line
pub struct CommandSource {
    name: &'static str,
    program: String,
    args: Vec<String>,
    unit: TimeUnit,
    timeout: Duration,
}

impl CommandSource {
    pub fn for_player(kind: PlayerKind, timeout: Duration) -> Self {
        match kind {
            PlayerKind::Music => Self {
                name: "Music",
                program: "osascript".to_string(),
                args: vec!["-e".to_string(), MUSIC_SCRIPT.to_string()],
                unit: TimeUnit::Seconds,
                timeout,
            },
            PlayerKind::ITunes => Self {
                name: "iTunes",
                program: "powershell".to_string(),
                args: vec![
                    "-NoProfile".to_string(),
                    "-NonInteractive".to_string(),
                    "-Command".to_string(),
                    ITUNES_SCRIPT.to_string(),
                ],
                unit: TimeUnit::Seconds,
                timeout,
            },
            PlayerKind::Playerctl => {
                let sep = FIELD_SEPARATOR;
                let format = format!(
                    "{{{{lc(status)}}}}{sep}{{{{title}}}}{sep}{{{{artist}}}}{sep}{{{{album}}}}{sep}{{{{mpris:length}}}}{sep}{{{{position}}}}{sep}{{{{xesam:genre}}}}{sep}",
                    sep = sep
                );
                Self {
                    name: "playerctl",
                    program: "playerctl".to_string(),
                    args: vec!["metadata".to_string(), "--format".to_string(), format],
                    unit: TimeUnit::Microseconds,
                    timeout,
                }
            }
        }
    }

    /// Run the helper, killing it if it outlives the timeout
    fn run(&self) -> Result<Option<String>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait().context("Failed to check helper status")? {
                Some(status) => break status,
                None if started.elapsed() >= self.timeout => {
                    child.kill().ok();
                    child.wait().ok();
                    bail!("{} did not answer within {:?}", self.program, self.timeout);
                }
                None => thread::sleep(WAIT_INTERVAL),
            }
        };

        if !status.success() {
            // playerctl exits non-zero when no player is running
            log::debug!("{} exited with {}", self.program, status);
            return Ok(None);
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            let mut bytes = Vec::new();
            stdout
                .read_to_end(&mut bytes)
                .context("Failed to read helper output")?;
            output = String::from_utf8_lossy(&bytes).into_owned();
        }
        Ok(Some(output))
    }
}

impl MediaSource for CommandSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn current_track(&self) -> Option<NowPlayingData> {
        let output = match self.run() {
            Ok(Some(output)) => output,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("{} query failed: {:#}", self.name, e);
                return None;
            }
        };

        match parse_status_line(&output, self.unit) {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                log::debug!("{} is not running", self.name);
                None
            }
            Err(e) => {
                log::warn!("Unreadable {} status: {:#}", self.name, e);
                None
            }
        }
    }
}

/// Parse a helper's status line. `Ok(None)` means the player isn't running.
fn parse_status_line(output: &str, unit: TimeUnit) -> Result<Option<NowPlayingData>> {
    let line = output.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' ');
    if line.is_empty() || line.eq_ignore_ascii_case(NOT_RUNNING) {
        return Ok(None);
    }

    let mut fields = line.split(FIELD_SEPARATOR);
    let state = parse_state(fields.next().unwrap_or_default())?;

    let text = |field: Option<&str>| {
        field
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "missing value")
            .map(String::from)
    };

    let name = text(fields.next());
    let artist = text(fields.next());
    let album = text(fields.next());
    let duration = parse_number(fields.next()).map(|v| unit.to_seconds(v));
    let elapsed = parse_number(fields.next()).map(|v| unit.to_seconds(v));
    let genre = text(fields.next());
    let year = fields
        .next()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|year| *year > 0);

    Ok(Some(NowPlayingData {
        name,
        artist,
        album,
        duration,
        elapsed,
        genre,
        year,
        state,
    }))
}

fn parse_state(raw: &str) -> Result<PlaybackState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "playing" | "fast forwarding" | "rewinding" => Ok(PlaybackState::Playing),
        "paused" => Ok(PlaybackState::Paused),
        "stopped" => Ok(PlaybackState::Stopped),
        other => bail!("unknown player state '{}'", other),
    }
}

/// Lenient number parsing; AppleScript may print a decimal comma
fn parse_number(field: Option<&str>) -> Option<f64> {
    field
        .map(|v| v.trim().replace(',', "."))
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}
