//! Scripted stand-in for the desktop host, listening on a Unix socket

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use serde_json::{json, Value};
use tempfile::TempDir;

use super::transport::{read_frame, write_frame, Opcode};

pub struct FakeHost<T> {
    _dir: TempDir,
    endpoint: PathBuf,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> FakeHost<T> {
    /// Accept one connection and hand it to `script`
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(UnixStream) -> T + Send + 'static,
    {
        let (dir, endpoint, listener) = bind();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            script(stream)
        });

        Self {
            _dir: dir,
            endpoint,
            handle,
        }
    }

    pub fn endpoint(&self) -> PathBuf {
        self.endpoint.clone()
    }

    /// Wait for the script to finish, surfacing its assertions
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<U: Send + 'static> FakeHost<Vec<U>> {
    /// Accept `count` connections in sequence, running `script` on each
    pub fn spawn_many<F>(count: usize, script: F) -> Self
    where
        F: Fn(UnixStream) -> U + Send + 'static,
    {
        let (dir, endpoint, listener) = bind();
        let handle = thread::spawn(move || {
            (0..count)
                .map(|_| {
                    let (stream, _) = listener.accept().unwrap();
                    script(stream)
                })
                .collect()
        });

        Self {
            _dir: dir,
            endpoint,
            handle,
        }
    }
}

fn bind() -> (TempDir, PathBuf, UnixListener) {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = dir.path().join("discord-ipc-0");
    let listener = UnixListener::bind(&endpoint).unwrap();
    (dir, endpoint, listener)
}

pub fn ready_reply() -> Value {
    json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "data": {
            "v": 1,
            "user": { "id": "1", "username": "listener" }
        },
        "nonce": null
    })
}

/// Read the handshake frame and acknowledge it, returning its body
pub fn accept_handshake(stream: &mut UnixStream) -> Value {
    let (opcode, body) = read_frame(stream).unwrap();
    assert_eq!(opcode, Opcode::Handshake);
    write_frame(stream, Opcode::Frame, &ready_reply()).unwrap();
    body
}

/// Reply to a command the way the host does: echo `cmd` and `nonce`, attach `data`
pub fn ack(request: &Value, data: Value) -> Value {
    json!({
        "cmd": request["cmd"],
        "evt": null,
        "data": data,
        "nonce": request["nonce"],
    })
}
