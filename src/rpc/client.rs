use serde::Deserialize;
use serde_json::Value;

use super::error::{ConnectError, PresenceError, TransportError};
use super::payload::{Activity, ActivityType, Command};
use super::transport::{ConnectionState, Opcode, Ready, TransportLink};

/// The host's reply to a command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Set/clear rich presence over a [`TransportLink`].
///
/// Calls block until the host replies. Nothing is retried here; the caller
/// decides what to do with a failure.
pub struct PresenceClient {
    link: TransportLink,
    activity_type: ActivityType,
}

impl PresenceClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_link(TransportLink::new(client_id))
    }

    pub fn with_link(link: TransportLink) -> Self {
        Self {
            link,
            activity_type: ActivityType::Listening,
        }
    }

    /// Type used for activities that don't set one themselves
    pub fn with_activity_type(mut self, activity_type: ActivityType) -> Self {
        self.activity_type = activity_type;
        self
    }

    pub fn connect(&mut self) -> Result<Ready, ConnectError> {
        self.link.connect()
    }

    pub fn is_ready(&self) -> bool {
        self.link.state() == ConnectionState::Ready
    }

    pub fn update(&mut self, activity: &Activity) -> Result<Ack, PresenceError> {
        let command = Command::set_activity(None, Some(activity), self.activity_type);
        self.dispatch(&command)
    }

    pub fn clear(&mut self) -> Result<Ack, PresenceError> {
        let command = Command::set_activity(None, None, self.activity_type);
        self.dispatch(&command)
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    fn dispatch(&mut self, command: &Command) -> Result<Ack, PresenceError> {
        let reply = self.link.send(Opcode::Frame, command)?;

        let ack: Ack = serde_json::from_value(reply)
            .map_err(|e| TransportError::Malformed(format!("unexpected reply shape: {}", e)))?;

        if ack.evt.as_deref() == Some("ERROR") {
            return Err(PresenceError::Rejected {
                code: ack.data["code"].as_i64().unwrap_or(0),
                message: ack.data["message"]
                    .as_str()
                    .unwrap_or("no reason given")
                    .to_string(),
            });
        }

        log::trace!("Reply to {:?}: {}", ack.cmd, ack.data);

        if ack.nonce.as_deref() != Some(command.nonce.as_str()) {
            log::debug!(
                "Reply nonce {:?} does not match request nonce {}",
                ack.nonce,
                command.nonce
            );
        }

        Ok(ack)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::rpc::testing::{accept_handshake, ack, FakeHost};
    use crate::rpc::transport::{read_frame, write_frame};
    use serde_json::json;

    fn client_for<T: Send + 'static>(host: &FakeHost<T>) -> PresenceClient {
        let mut client =
            PresenceClient::with_link(TransportLink::with_endpoints("42", vec![host.endpoint()]));
        client.connect().unwrap();
        client
    }

    #[test]
    fn clear_then_update_are_acknowledged_in_order() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let mut requests = Vec::new();
            for marker in ["first", "second"] {
                let (opcode, request) = read_frame(&mut stream).unwrap();
                assert_eq!(opcode, Opcode::Frame);
                write_frame(&mut stream, Opcode::Frame, &ack(&request, json!(marker))).unwrap();
                requests.push(request);
            }
            requests
        });

        let mut client = client_for(&host);
        let cleared = client.clear().unwrap();
        let updated = client
            .update(&Activity::new().details("Song").state("Artist"))
            .unwrap();

        assert_eq!(cleared.data, "first");
        assert_eq!(updated.data, "second");
        assert_eq!(cleared.cmd.as_deref(), Some("SET_ACTIVITY"));

        let requests = host.join();
        assert!(requests[0]["args"]["activity"].is_null());
        assert_eq!(requests[1]["args"]["activity"]["details"], "Song");
        assert_ne!(requests[0]["nonce"], requests[1]["nonce"]);
    }

    #[test]
    fn acks_are_positional_not_by_nonce() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let (_, request) = read_frame(&mut stream).unwrap();
            let mut reply = ack(&request, json!("stale"));
            reply["nonce"] = json!("some-other-nonce");
            write_frame(&mut stream, Opcode::Frame, &reply).unwrap();
        });

        let mut client = client_for(&host);
        let reply = client.clear().unwrap();
        assert_eq!(reply.data, "stale");
        assert_eq!(reply.nonce.as_deref(), Some("some-other-nonce"));
        host.join();
    }

    #[test]
    fn update_defaults_to_listening() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let mut kinds = Vec::new();
            for _ in 0..2 {
                let (_, request) = read_frame(&mut stream).unwrap();
                kinds.push(request["args"]["activity"]["type"].clone());
                write_frame(&mut stream, Opcode::Frame, &ack(&request, Value::Null)).unwrap();
            }
            kinds
        });

        let mut client = client_for(&host);
        client.update(&Activity::new().details("a")).unwrap();
        client
            .update(&Activity::new().details("b").kind(ActivityType::Playing))
            .unwrap();

        assert_eq!(host.join(), vec![json!(2), json!(0)]);
    }

    #[test]
    fn configured_activity_type_applies() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let (_, request) = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, Opcode::Frame, &ack(&request, Value::Null)).unwrap();
            request["args"]["activity"]["type"].clone()
        });

        let link = TransportLink::with_endpoints("42", vec![host.endpoint()]);
        let mut client = PresenceClient::with_link(link).with_activity_type(ActivityType::Watching);
        client.connect().unwrap();
        client.update(&Activity::new().details("x")).unwrap();

        assert_eq!(host.join(), json!(3));
    }

    #[test]
    fn error_event_is_rejected_but_link_survives() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            let (_, request) = read_frame(&mut stream).unwrap();
            let reply = json!({
                "cmd": "SET_ACTIVITY",
                "evt": "ERROR",
                "data": { "code": 4000, "message": "child \"activity\" fails" },
                "nonce": request["nonce"],
            });
            write_frame(&mut stream, Opcode::Frame, &reply).unwrap();
        });

        let mut client = client_for(&host);
        let err = client.update(&Activity::new().details("x")).unwrap_err();
        match &err {
            PresenceError::Rejected { code, message } => {
                assert_eq!(*code, 4000);
                assert!(message.contains("activity"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!err.is_transport());
        assert!(client.is_ready());
        host.join();
    }

    #[test]
    fn update_before_connect_is_transport_error() {
        let mut client = PresenceClient::with_link(TransportLink::with_endpoints("42", Vec::new()));
        let err = client.clear().unwrap_err();
        assert!(matches!(
            err,
            PresenceError::Transport(TransportError::NotConnected)
        ));
    }

    #[test]
    fn non_object_reply_is_malformed() {
        let host = FakeHost::spawn(|mut stream| {
            accept_handshake(&mut stream);
            read_frame(&mut stream).unwrap();
            write_frame(&mut stream, Opcode::Frame, &json!("not an object")).unwrap();
        });

        let mut client = client_for(&host);
        let err = client.clear().unwrap_err();
        assert!(matches!(
            err,
            PresenceError::Transport(TransportError::Malformed(_))
        ));
        host.join();
    }
}
