//! Framed IPC link to the desktop host.
//!
//! Frame layout: `[opcode: u32 LE][length: u32 LE][UTF-8 JSON body]`.
//! One request is in flight at a time and replies are matched in order.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};

use super::error::{ConnectError, TransportError};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest body we accept from the host
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 8;
const ENDPOINT_SLOTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Ready,
    Closed,
}

/// Acknowledged handshake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ready {
    /// Username the host reported, if any
    pub user: Option<String>,
}

/// Anything the link can speak frames over (Unix socket, named pipe)
pub trait IpcStream: Read + Write + Send {}

impl<T: Read + Write + Send> IpcStream for T {}

/// Encode one frame: 8-byte header followed by the JSON body
pub fn encode_frame<T: Serialize + ?Sized>(
    opcode: Opcode,
    payload: &T,
) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| TransportError::Malformed(format!("failed to encode body: {}", e)))?;

    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::Malformed(format!(
            "body of {} bytes exceeds {} byte limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(opcode as u32).to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn write_frame<W: Write + ?Sized, T: Serialize + ?Sized>(
    writer: &mut W,
    opcode: Opcode,
    payload: &T,
) -> Result<(), TransportError> {
    let frame = encode_frame(opcode, payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one frame. A short read anywhere is reported as `Closed`.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<(Opcode, Value), TransportError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let raw_opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let opcode = Opcode::from_u32(raw_opcode)
        .ok_or_else(|| TransportError::Malformed(format!("unknown opcode {}", raw_opcode)))?;

    if len > MAX_FRAME_LEN {
        return Err(TransportError::Malformed(format!(
            "declared length {} exceeds {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let value = serde_json::from_slice(&body)
        .map_err(|e| TransportError::Malformed(format!("invalid JSON body: {}", e)))?;

    Ok((opcode, value))
}

/// Read the next non-ping frame, answering pings along the way
fn read_message<S: Read + Write + ?Sized>(
    stream: &mut S,
) -> Result<(Opcode, Value), TransportError> {
    loop {
        let (opcode, body) = read_frame(stream)?;
        if opcode == Opcode::Ping {
            log::debug!("Answering ping from presence host");
            write_frame(stream, Opcode::Pong, &body)?;
            continue;
        }
        return Ok((opcode, body));
    }
}

/// Owns the socket to the desktop host and its handshake state
pub struct TransportLink {
    client_id: String,
    endpoints: Vec<PathBuf>,
    stream: Option<Box<dyn IpcStream>>,
    state: ConnectionState,
}

impl TransportLink {
    /// Link that will search the platform's standard endpoint locations
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_endpoints(client_id, candidate_endpoints())
    }

    /// Link restricted to an explicit, ordered list of endpoints
    pub fn with_endpoints(client_id: impl Into<String>, endpoints: Vec<PathBuf>) -> Self {
        Self {
            client_id: client_id.into(),
            endpoints,
            stream: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open the first reachable endpoint and perform the handshake.
    ///
    /// On failure the socket is released and the link is left `Disconnected`
    /// so the caller can try again.
    pub fn connect(&mut self) -> Result<Ready, ConnectError> {
        if self.state == ConnectionState::Ready {
            log::debug!("Presence link already connected");
            return Ok(Ready::default());
        }

        let stream = open_first(&self.endpoints)?;
        self.stream = Some(stream);
        self.state = ConnectionState::Handshaking;

        match self.handshake() {
            Ok(ready) => {
                self.state = ConnectionState::Ready;
                match &ready.user {
                    Some(user) => log::info!("Presence link ready (connected as {})", user),
                    None => log::info!("Presence link ready"),
                }
                Ok(ready)
            }
            Err(e) => {
                self.stream = None;
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<Ready, ConnectError> {
        let stream = self.stream.as_mut().ok_or(ConnectError::Closed)?;

        let hello = json!({ "v": PROTOCOL_VERSION, "client_id": self.client_id });
        write_frame(stream.as_mut(), Opcode::Handshake, &hello).map_err(handshake_error)?;

        let (opcode, body) = read_message(stream.as_mut()).map_err(handshake_error)?;
        match opcode {
            Opcode::Close => Err(rejection(&body)),
            Opcode::Frame if body["evt"] == "READY" => Ok(Ready {
                user: body["data"]["user"]["username"].as_str().map(String::from),
            }),
            Opcode::Frame if body["evt"] == "ERROR" => Err(rejection(&body["data"])),
            _ => Err(ConnectError::Transport(TransportError::Malformed(format!(
                "unexpected {:?} frame during handshake: {}",
                opcode, body
            )))),
        }
    }

    /// Write one frame and block for the next reply frame's JSON body
    pub fn send<T: Serialize + ?Sized>(
        &mut self,
        opcode: Opcode,
        payload: &T,
    ) -> Result<Value, TransportError> {
        if self.state != ConnectionState::Ready {
            return Err(TransportError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        write_frame(stream.as_mut(), opcode, payload)?;

        let (reply, body) = read_message(stream.as_mut())?;
        match reply {
            Opcode::Frame => Ok(body),
            Opcode::Close => {
                log::warn!("Presence host closed the link: {}", body);
                Err(TransportError::Closed)
            }
            other => Err(TransportError::Malformed(format!(
                "unexpected {:?} frame in reply",
                other
            ))),
        }
    }

    /// Say goodbye (best effort) and release the socket. Safe to call twice.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if let Some(mut stream) = self.stream.take() {
            if self.state == ConnectionState::Ready {
                let bye = json!({ "v": PROTOCOL_VERSION, "client_id": self.client_id });
                if let Err(e) = write_frame(stream.as_mut(), Opcode::Close, &bye) {
                    log::debug!("Ignoring error while sending close frame: {}", e);
                }
            }
            drop(stream);
            log::info!("Presence link closed");
        }

        self.state = ConnectionState::Closed;
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn handshake_error(err: TransportError) -> ConnectError {
    match err {
        TransportError::Closed => ConnectError::Closed,
        other => ConnectError::Transport(other),
    }
}

fn rejection(body: &Value) -> ConnectError {
    ConnectError::Rejected {
        code: body["code"].as_i64().unwrap_or(0),
        message: body["message"]
            .as_str()
            .unwrap_or("no reason given")
            .to_string(),
    }
}

fn open_first(endpoints: &[PathBuf]) -> Result<Box<dyn IpcStream>, ConnectError> {
    for path in endpoints {
        match open_endpoint(path) {
            Ok(stream) => {
                log::debug!("Opened presence endpoint {}", path.display());
                return Ok(stream);
            }
            Err(e) => {
                log::trace!("Endpoint {} unavailable: {}", path.display(), e);
            }
        }
    }

    Err(ConnectError::NoEndpoint {
        tried: endpoints.len(),
    })
}

#[cfg(unix)]
fn open_endpoint(path: &Path) -> io::Result<Box<dyn IpcStream>> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
fn open_endpoint(path: &Path) -> io::Result<Box<dyn IpcStream>> {
    let pipe = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)?;
    Ok(Box::new(pipe))
}

#[cfg(not(any(unix, windows)))]
fn open_endpoint(path: &Path) -> io::Result<Box<dyn IpcStream>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("no local IPC support for {}", path.display()),
    ))
}

/// Standard endpoint locations for this platform, in the order they are tried
#[cfg(unix)]
pub fn candidate_endpoints() -> Vec<PathBuf> {
    let uid = nix::unistd::getuid().as_raw();
    candidate_endpoints_with(|key| std::env::var(key).ok(), uid)
}

#[cfg(windows)]
pub fn candidate_endpoints() -> Vec<PathBuf> {
    (0..ENDPOINT_SLOTS)
        .map(|slot| PathBuf::from(format!(r"\\?\pipe\discord-ipc-{}", slot)))
        .collect()
}

#[cfg(not(any(unix, windows)))]
pub fn candidate_endpoints() -> Vec<PathBuf> {
    Vec::new()
}

#[cfg(unix)]
fn candidate_endpoints_with(lookup: impl Fn(&str) -> Option<String>, uid: u32) -> Vec<PathBuf> {
    // Flatpak and Snap builds of the host put their sockets in a subdirectory
    const SUBDIRS: [&str; 3] = ["", "app/com.discordapp.Discord", "snap.discord"];

    let mut roots: Vec<PathBuf> = Vec::new();
    let env_roots = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let fallbacks = [PathBuf::from(format!("/run/user/{}", uid)), PathBuf::from("/tmp")];

    for root in env_roots.chain(fallbacks) {
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    let mut endpoints = Vec::with_capacity(roots.len() * SUBDIRS.len() * ENDPOINT_SLOTS);
    for root in &roots {
        for sub in SUBDIRS {
            let dir = if sub.is_empty() { root.clone() } else { root.join(sub) };
            for slot in 0..ENDPOINT_SLOTS {
                endpoints.push(dir.join(format!("discord-ipc-{}", slot)));
            }
        }
    }
    endpoints
}


#[cfg(all(test, unix))]
mod link_tests {
    use super::*;
    use crate::rpc::testing::{accept_handshake, ready_reply, FakeHost};

    #[test]
    fn connect_performs_handshake() {
        let host = FakeHost::spawn(|mut stream| {
            let (opcode, body) = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, Opcode::Frame, &ready_reply()).unwrap();
            (opcode, body)
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        let ready = link.connect().unwrap();
        assert_eq!(ready.user.as_deref(), Some("listener"));
        assert_eq!(link.state(), ConnectionState::Ready);

        let (opcode, body) = host.join();
        assert_eq!(opcode, Opcode::Handshake);
        assert_eq!(body, json!({ "v": 1, "client_id": "1234" }));
    }

    #[test]
    fn connect_skips_unreachable_candidates() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
        });
        let missing = host.endpoint().with_file_name("discord-ipc-missing");

        let mut link = TransportLink::with_endpoints("1234", vec![missing, host.endpoint()]);
        link.connect().unwrap();
        assert_eq!(link.state(), ConnectionState::Ready);
        host.join();
    }

    #[test]
    fn connect_without_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = vec![dir.path().join("discord-ipc-0"), dir.path().join("discord-ipc-1")];

        let mut link = TransportLink::with_endpoints("1234", endpoints);
        let err = link.connect().unwrap_err();
        assert!(matches!(err, ConnectError::NoEndpoint { tried: 2 }));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn host_that_never_acknowledges_fails_connect() {
        let host = FakeHost::spawn(|mut stream| {
            let (opcode, _) = read_frame(&mut stream).unwrap();
            assert_eq!(opcode, Opcode::Handshake);
            // drop without replying
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        let err = link.connect().unwrap_err();
        assert!(matches!(err, ConnectError::Closed));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        host.join();
    }

    #[test]
    fn rejected_handshake_reports_reason() {
        let host = FakeHost::spawn(|mut stream| {
            read_frame(&mut stream).unwrap();
            let reason = json!({ "code": 4000, "message": "Invalid Client ID" });
            write_frame(&mut stream, Opcode::Close, &reason).unwrap();
        });

        let mut link = TransportLink::with_endpoints("bogus", vec![host.endpoint()]);
        match link.connect() {
            Err(ConnectError::Rejected { code, message }) => {
                assert_eq!(code, 4000);
                assert_eq!(message, "Invalid Client ID");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        host.join();
    }

    #[test]
    fn send_answers_pings_before_reply() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let (_, request) = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, Opcode::Ping, &json!({ "seq": 1 })).unwrap();
            let pong = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, Opcode::Frame, &json!({ "echo": request })).unwrap();
            pong
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        link.connect().unwrap();
        let reply = link.send(Opcode::Frame, &json!({ "n": 5 })).unwrap();
        assert_eq!(reply["echo"]["n"], 5);

        let (opcode, body) = host.join();
        assert_eq!(opcode, Opcode::Pong);
        assert_eq!(body, json!({ "seq": 1 }));
    }

    #[test]
    fn peer_hangup_mid_exchange_is_closed() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            read_frame(&mut stream).unwrap();
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        link.connect().unwrap();
        let err = link.send(Opcode::Frame, &json!({})).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        // No automatic transition; the caller decides to close and reconnect
        assert_eq!(link.state(), ConnectionState::Ready);
        host.join();
    }

    #[test]
    fn close_sends_goodbye_once() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let bye = read_frame(&mut stream).unwrap();
            let after = read_frame(&mut stream);
            (bye, after.is_err())
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        link.connect().unwrap();
        link.close();
        link.close();
        assert_eq!(link.state(), ConnectionState::Closed);
        assert!(matches!(
            link.send(Opcode::Frame, &json!({})),
            Err(TransportError::NotConnected)
        ));

        let ((opcode, body), stream_ended) = host.join();
        assert_eq!(opcode, Opcode::Close);
        assert_eq!(body, json!({ "v": 1, "client_id": "1234" }));
        assert!(stream_ended);
    }

    #[test]
    fn drop_releases_link() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            read_frame(&mut stream).map(|(opcode, _)| opcode).ok()
        });

        {
            let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
            link.connect().unwrap();
        }

        assert_eq!(host.join(), Some(Opcode::Close));
    }

    #[test]
    fn reconnect_after_close() {
        let host = FakeHost::spawn_many(2, |mut stream| {
            accept_handshake(&mut stream);
        });

        let mut link = TransportLink::with_endpoints("1234", vec![host.endpoint()]);
        link.connect().unwrap();
        link.close();
        link.connect().unwrap();
        assert_eq!(link.state(), ConnectionState::Ready);
        drop(link);
        host.join();
    }
}
