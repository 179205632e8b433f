use std::io;

use thiserror::Error;

/// Failure to establish a ready link. Never retried internally.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no presence endpoint reachable ({tried} candidates tried)")]
    NoEndpoint { tried: usize },

    #[error("host closed the connection before acknowledging the handshake")]
    Closed,

    #[error("handshake rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("handshake failed: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of one framed exchange on a ready link
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// Errors surfaced by [`PresenceClient`](super::PresenceClient) calls
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The host answered, but with an error event. The link is still usable.
    #[error("host rejected command ({code}): {message}")]
    Rejected { code: i64, message: String },
}

impl PresenceError {
    /// Whether the link should be considered broken after this error
    pub fn is_transport(&self) -> bool {
        matches!(self, PresenceError::Transport(_))
    }
}
