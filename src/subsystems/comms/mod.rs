//! Comms subsystem — manages all external I/O channels.
//!
//! Each channel (console, Telegram, HTTP) implements [`Component`] and is
//! spawned as an independent task by [`start`]. Channels capture their shared
//! [`Arc<CommsState>`] at construction time.
//!
//! Outbound notifications travel the other way: agents call `notify/send`,
//! [`NotifySubsystem`] publishes on the broadcast channel created by
//! [`outbound_channel`], and each channel relays what it receives.

#[cfg(feature = "channel-axum")]
pub mod http;
pub mod notify;
#[cfg(feature = "channel-pty")]
pub mod pty;
mod state;
#[cfg(feature = "channel-telegram")]
pub mod telegram;

pub use notify::{NOTIFY_SEND_METHOD, NotifySubsystem};
pub use state::{CommsEvent, CommsState};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};
use crate::supervisor::bus::BusHandle;

const OUTBOUND_CAPACITY: usize = 64;

/// Sender side of the outbound notification stream. Hand one clone to
/// [`NotifySubsystem`] and one to [`start`].
pub fn outbound_channel() -> broadcast::Sender<String> {
    broadcast::channel(OUTBOUND_CAPACITY).0
}

/// Spawn all configured channels. Returns as soon as the tasks are spawned.
///
/// If any channel exits with an error the shared `shutdown` token is
/// cancelled so siblings stop too.
pub fn start(
    config: &Config,
    bus: BusHandle,
    outbound: broadcast::Sender<String>,
    shutdown: CancellationToken,
) -> SubsystemHandle {
    let (event_tx, event_rx) = mpsc::channel::<CommsEvent>(32);
    let state = Arc::new(CommsState::new(bus, event_tx, outbound));

    let mut components: Vec<Box<dyn Component>> = Vec::new();

    #[cfg(feature = "channel-pty")]
    if config.comms_pty_should_load() {
        info!("loading console channel");
        components.push(Box::new(pty::PtyChannel::new("pty0", state.clone())));
    }

    #[cfg(feature = "channel-telegram")]
    if config.comms_telegram_should_load() {
        info!("loading telegram channel");
        components.push(Box::new(telegram::TelegramChannel::new(
            "telegram0",
            config.comms.telegram.clone(),
            state.clone(),
        )));
    }

    #[cfg(feature = "channel-axum")]
    if config.comms_http_should_load() {
        info!(bind = %config.comms.http.bind, "loading http channel");
        components.push(Box::new(http::HttpChannel::new("http0", config.comms.http.bind.clone(), state.clone())));
    }

    if components.is_empty() {
        warn!("no comms channels enabled — the bot will only run scheduled jobs");
    }

    // Monitoring only; ends once every channel has dropped its state.
    tokio::spawn(async move {
        let mut rx = event_rx;
        while let Some(event) = rx.recv().await {
            match event {
                CommsEvent::ChannelShutdown { channel_id } => debug!(%channel_id, "channel reported shutdown"),
                CommsEvent::Rejected { channel_id, chat } => debug!(%channel_id, %chat, "channel rejected a chat"),
            }
        }
    });

    drop(state);
    spawn_components(components, shutdown)
}
