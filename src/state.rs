use std::sync::Arc;
use parking_lot::Mutex;

use crate::rpc::PresenceClient;

/// The presence client, shared by the poll loop and the signal handler
pub type SharedClient = Arc<Mutex<PresenceClient>>;

pub fn create_client(client: PresenceClient) -> SharedClient {
    Arc::new(Mutex::new(client))
}
