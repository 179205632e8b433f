mod config;
mod cover_art;
mod media;
mod poller;
mod rpc;
mod state;
mod types;

use std::process;
use std::thread;
use std::time::Duration;

use config::Config;
use cover_art::CoverArt;
use media::{CommandSource, PlayerKind};
use poller::Poller;
use rpc::PresenceClient;
use state::SharedClient;

/// Bad configuration or an unexpected startup failure
const EXIT_FAILURE: i32 = 1;
/// The chat application isn't running or refused us
const EXIT_PRESENCE_UNAVAILABLE: i32 = 2;

/// How long the signal handler waits for an in-flight update before giving up
const SHUTDOWN_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    log::info!("Starting now playing presence");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            process::exit(EXIT_FAILURE);
        }
    };

    let client = state::create_client(
        PresenceClient::new(config.client_id.clone()).with_activity_type(config.activity_type),
    );

    if let Err(e) = client.lock().connect() {
        log::error!("Could not reach the chat application: {}", e);
        log::error!("Is Discord installed and running?");
        process::exit(EXIT_PRESENCE_UNAVAILABLE);
    }

    // Setup signal handler for Ctrl+C (SIGINT) and SIGTERM
    let client_for_signal = client.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received interrupt signal, closing presence link...");
        shutdown(&client_for_signal);
        process::exit(0);
    }) {
        log::error!("Failed to set signal handler: {}", e);
        shutdown(&client);
        process::exit(EXIT_FAILURE);
    }

    let player = config.player.unwrap_or_else(PlayerKind::platform_default);
    let source = CommandSource::for_player(player, config.query_timeout);
    log::info!("Polling {:?} every {:?}", player, config.interval);

    let cover_art = if config.cover_art {
        match CoverArt::new() {
            Ok(cover_art) => Some(cover_art),
            Err(e) => {
                log::warn!("Cover art disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut poller = Poller::new(client, Box::new(source), cover_art);
    loop {
        poller.tick();
        thread::sleep(config.interval);
    }
}

/// Close the link if the poll loop lets go of it in time
fn shutdown(client: &SharedClient) {
    match client.try_lock_for(SHUTDOWN_LOCK_TIMEOUT) {
        Some(mut client) => {
            client.close();
            log::info!("Presence link closed on shutdown");
        }
        None => {
            log::warn!("Presence update still in flight, exiting without closing the link");
        }
    }
}
