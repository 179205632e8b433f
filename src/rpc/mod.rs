//! Client side of the desktop chat application's local presence protocol

mod client;
mod error;
mod payload;
mod transport;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use client::{Ack, PresenceClient};
pub use error::{ConnectError, PresenceError, TransportError};
pub use payload::{Activity, ActivityType};
#[allow(unused_imports)]
pub use payload::{Button, Command, CommandKind, VoiceSettings};
#[allow(unused_imports)]
pub use transport::{ConnectionState, Opcode, Ready, TransportLink};

#[cfg(test)]
pub(crate) use transport::{read_frame, write_frame};
