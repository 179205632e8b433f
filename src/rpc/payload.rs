//! Command payloads for the local presence protocol.
//!
//! Builders here are pure: they never fail and never touch the wire. Absent
//! fields are left out of the JSON entirely, except for the `activity` argument
//! of a clear request, which is sent as an explicit `null`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// The protocol accepts at most two buttons per activity
pub const MAX_BUTTONS: usize = 2;

/// What the user is shown as doing ("Playing ...", "Listening to ...")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Playing = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
    Competing = 5,
}

impl Serialize for ActivityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playing" | "0" => Ok(Self::Playing),
            "streaming" | "1" => Ok(Self::Streaming),
            "listening" | "2" => Ok(Self::Listening),
            "watching" | "3" => Ok(Self::Watching),
            "custom" | "4" => Ok(Self::Custom),
            "competing" | "5" => Ok(Self::Competing),
            other => Err(format!("unknown activity type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub url: String,
}

/// One "now playing" snapshot. Every field is optional; unset fields never
/// reach the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub state: Option<String>,
    pub details: Option<String>,
    /// `None` lets the sending client pick its default type
    pub kind: Option<ActivityType>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    pub small_image: Option<String>,
    pub small_text: Option<String>,
    pub party_id: Option<String>,
    pub party_size: Option<[u32; 2]>,
    pub join: Option<String>,
    pub spectate: Option<String>,
    pub match_secret: Option<String>,
    pub buttons: Vec<Button>,
    pub instance: bool,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            state: None,
            details: None,
            kind: None,
            start: None,
            end: None,
            large_image: None,
            large_text: None,
            small_image: None,
            small_text: None,
            party_id: None,
            party_size: None,
            join: None,
            spectate: None,
            match_secret: None,
            buttons: Vec::new(),
            instance: true,
        }
    }
}

// Only part of the builder is used by the poll loop
#[allow(dead_code)]
impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(mut self, kind: ActivityType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Start timestamp in epoch seconds. Passed through as given.
    pub fn start(mut self, secs: i64) -> Self {
        self.start = Some(secs);
        self
    }

    pub fn end(mut self, secs: i64) -> Self {
        self.end = Some(secs);
        self
    }

    /// Start timestamp from a clock reading, truncated to whole seconds
    pub fn start_at(self, time: SystemTime) -> Self {
        self.start(epoch_seconds(time))
    }

    pub fn end_at(self, time: SystemTime) -> Self {
        self.end(epoch_seconds(time))
    }

    pub fn large_image(mut self, key: impl Into<String>, text: Option<impl Into<String>>) -> Self {
        self.large_image = Some(key.into());
        self.large_text = text.map(Into::into);
        self
    }

    pub fn large_text(mut self, text: impl Into<String>) -> Self {
        self.large_text = Some(text.into());
        self
    }

    pub fn small_image(mut self, key: impl Into<String>, text: Option<impl Into<String>>) -> Self {
        self.small_image = Some(key.into());
        self.small_text = text.map(Into::into);
        self
    }

    pub fn party(mut self, id: impl Into<String>, size: Option<[u32; 2]>) -> Self {
        self.party_id = Some(id.into());
        self.party_size = size;
        self
    }

    pub fn secrets(
        mut self,
        join: Option<String>,
        spectate: Option<String>,
        match_secret: Option<String>,
    ) -> Self {
        self.join = join;
        self.spectate = spectate;
        self.match_secret = match_secret;
        self
    }

    /// Append a button. Buttons past [`MAX_BUTTONS`] are dropped.
    pub fn button(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        if self.buttons.len() < MAX_BUTTONS {
            self.buttons.push(Button {
                label: label.into(),
                url: url.into(),
            });
        } else {
            log::debug!("Dropping activity button beyond the first {}", MAX_BUTTONS);
        }
        self
    }

    pub fn instance(mut self, instance: bool) -> Self {
        self.instance = instance;
        self
    }

    fn to_wire(&self, default_kind: ActivityType) -> WireActivity<'_> {
        let timestamps = (self.start.is_some() || self.end.is_some()).then_some(Timestamps {
            start: self.start,
            end: self.end,
        });

        let assets = Assets {
            large_image: self.large_image.as_deref(),
            large_text: self.large_text.as_deref(),
            small_image: self.small_image.as_deref(),
            small_text: self.small_text.as_deref(),
        };

        let party = Party {
            id: self.party_id.as_deref(),
            size: self.party_size,
        };

        let secrets = Secrets {
            join: self.join.as_deref(),
            spectate: self.spectate.as_deref(),
            match_secret: self.match_secret.as_deref(),
        };

        WireActivity {
            state: self.state.as_deref(),
            details: self.details.as_deref(),
            kind: self.kind.unwrap_or(default_kind),
            timestamps,
            assets: (!assets.is_empty()).then_some(assets),
            party: (!party.is_empty()).then_some(party),
            secrets: (!secrets.is_empty()).then_some(secrets),
            buttons: &self.buttons,
            instance: self.instance,
        }
    }
}

#[derive(Serialize)]
struct WireActivity<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
    #[serde(rename = "type")]
    kind: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamps: Option<Timestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assets: Option<Assets<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    party: Option<Party<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secrets: Option<Secrets<'a>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    buttons: &'a [Button],
    instance: bool,
}

#[derive(Serialize)]
struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<i64>,
}

#[derive(Serialize)]
struct Assets<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    large_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    large_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    small_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    small_text: Option<&'a str>,
}

impl Assets<'_> {
    fn is_empty(&self) -> bool {
        self.large_image.is_none()
            && self.large_text.is_none()
            && self.small_image.is_none()
            && self.small_text.is_none()
    }
}

#[derive(Serialize)]
struct Party<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<[u32; 2]>,
}

impl Party<'_> {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.size.is_none()
    }
}

#[derive(Serialize)]
struct Secrets<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    join: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spectate: Option<&'a str>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    match_secret: Option<&'a str>,
}

impl Secrets<'_> {
    fn is_empty(&self) -> bool {
        self.join.is_none() && self.spectate.is_none() && self.match_secret.is_none()
    }
}

/// RPC command names understood by the desktop host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    SetActivity,
    Authorize,
    Authenticate,
    GetGuilds,
    GetGuild,
    GetChannels,
    GetChannel,
    SetUserVoiceSettings,
    SelectVoiceChannel,
    GetSelectedVoiceChannel,
    SelectTextChannel,
    Subscribe,
    Unsubscribe,
    GetVoiceSettings,
    SetVoiceSettings,
    CaptureShortcut,
    SendActivityJoinInvite,
    CloseActivityRequest,
}

/// A request envelope: `{"cmd", "args", "evt"?, "nonce"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: CommandKind,
    pub args: Value,
    /// Only used by subscribe/unsubscribe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    pub nonce: String,
}

impl Command {
    fn new(cmd: CommandKind, args: Value) -> Self {
        Self {
            cmd,
            args,
            evt: None,
            nonce: next_nonce(),
        }
    }

    fn stripped(cmd: CommandKind, args: Value) -> Self {
        Self::new(cmd, strip_nulls(args))
    }

    /// `SET_ACTIVITY`. A `None` activity clears presence and is sent as an
    /// explicit `null`. `pid` defaults to this process, read at call time.
    pub fn set_activity(
        pid: Option<u32>,
        activity: Option<&Activity>,
        default_kind: ActivityType,
    ) -> Self {
        let pid = pid.unwrap_or_else(std::process::id);
        let activity = match activity {
            // Serializing borrowed strings and integers into a Value cannot fail
            Some(activity) => serde_json::to_value(activity.to_wire(default_kind))
                .unwrap_or(Value::Null),
            None => Value::Null,
        };

        Self::new(
            CommandKind::SetActivity,
            json!({
                "pid": pid,
                "activity": activity,
            }),
        )
    }
}

// The rest of the command family. Nothing in the poll loop uses these.
#[allow(dead_code)]
impl Command {
    pub fn authorize(client_id: &str, scopes: &[&str]) -> Self {
        Self::new(
            CommandKind::Authorize,
            json!({ "client_id": client_id, "scopes": scopes }),
        )
    }

    pub fn authenticate(token: &str) -> Self {
        Self::new(CommandKind::Authenticate, json!({ "access_token": token }))
    }

    pub fn get_guilds() -> Self {
        Self::new(CommandKind::GetGuilds, json!({}))
    }

    pub fn get_guild(guild_id: &str) -> Self {
        Self::new(CommandKind::GetGuild, json!({ "guild_id": guild_id }))
    }

    pub fn get_channels(guild_id: &str) -> Self {
        Self::new(CommandKind::GetChannels, json!({ "guild_id": guild_id }))
    }

    pub fn get_channel(channel_id: &str) -> Self {
        Self::new(CommandKind::GetChannel, json!({ "channel_id": channel_id }))
    }

    pub fn set_user_voice_settings(
        user_id: &str,
        pan_left: Option<f32>,
        pan_right: Option<f32>,
        volume: Option<u32>,
        mute: Option<bool>,
    ) -> Self {
        Self::stripped(
            CommandKind::SetUserVoiceSettings,
            json!({
                "user_id": user_id,
                "pan": { "left": pan_left, "right": pan_right },
                "volume": volume,
                "mute": mute,
            }),
        )
    }

    pub fn select_voice_channel(channel_id: &str) -> Self {
        Self::new(
            CommandKind::SelectVoiceChannel,
            json!({ "channel_id": channel_id }),
        )
    }

    pub fn get_selected_voice_channel() -> Self {
        Self::new(CommandKind::GetSelectedVoiceChannel, json!({}))
    }

    pub fn select_text_channel(channel_id: &str) -> Self {
        Self::new(
            CommandKind::SelectTextChannel,
            json!({ "channel_id": channel_id }),
        )
    }

    pub fn subscribe(event: &str, args: Option<Value>) -> Self {
        let mut command = Self::new(CommandKind::Subscribe, args.unwrap_or_else(|| json!({})));
        command.evt = Some(event.to_uppercase());
        command
    }

    pub fn unsubscribe(event: &str, args: Option<Value>) -> Self {
        let mut command = Self::new(CommandKind::Unsubscribe, args.unwrap_or_else(|| json!({})));
        command.evt = Some(event.to_uppercase());
        command
    }

    pub fn get_voice_settings() -> Self {
        Self::new(CommandKind::GetVoiceSettings, json!({}))
    }

    pub fn set_voice_settings(settings: VoiceSettings) -> Self {
        Self::stripped(
            CommandKind::SetVoiceSettings,
            json!({
                "input": settings.input,
                "output": settings.output,
                "mode": settings.mode,
                "automatic_gain_control": settings.automatic_gain_control,
                "echo_cancellation": settings.echo_cancellation,
                "noise_suppression": settings.noise_suppression,
                "qos": settings.qos,
                "silence_warning": settings.silence_warning,
                "deaf": settings.deaf,
                "mute": settings.mute,
            }),
        )
    }

    pub fn capture_shortcut(action: &str) -> Self {
        Self::new(
            CommandKind::CaptureShortcut,
            json!({ "action": action.to_uppercase() }),
        )
    }

    pub fn send_activity_join_invite(user_id: &str) -> Self {
        Self::new(
            CommandKind::SendActivityJoinInvite,
            json!({ "user_id": user_id }),
        )
    }

    pub fn close_activity_request(user_id: &str) -> Self {
        Self::new(
            CommandKind::CloseActivityRequest,
            json!({ "user_id": user_id }),
        )
    }
}

/// Arguments for `SET_VOICE_SETTINGS`; unset fields are left untouched remotely
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct VoiceSettings {
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub mode: Option<Value>,
    pub automatic_gain_control: Option<bool>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub qos: Option<bool>,
    pub silence_warning: Option<bool>,
    pub deaf: Option<bool>,
    pub mute: Option<bool>,
}

/// Recursively drop `null` leaves and objects left empty by doing so
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let stripped: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| match strip_nulls(value) {
                    Value::Null => None,
                    Value::Object(inner) if inner.is_empty() => None,
                    other => Some((key, other)),
                })
                .collect();
            Value::Object(stripped)
        }
        other => other,
    }
}

/// Whole seconds since the epoch; times before it come out negative
pub fn epoch_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// High-resolution timestamp, bumped so no two calls in this process repeat
fn next_nonce() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let previous = LAST_NONCE
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    let nanos = now.max(previous + 1);

    format!("{}.{:09}", nanos / 1_000_000_000, nanos % 1_000_000_000)
}
