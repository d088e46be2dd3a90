//! Shared state for the comms subsystem — the capability boundary for
//! channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below. The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods.
//!
//! Outbound notifications (stand-ups, task changes) arrive on a broadcast
//! channel fed by [`super::notify::NotifySubsystem`]; every channel that
//! relays them holds its own receiver from [`CommsState::subscribe`].

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::error::AppError;
use crate::supervisor::bus::{BusHandle, BusPayload};

// ── Events ────────────────────────────────────────────────────────────────────

/// Events a channel sends back to the comms subsystem manager.
#[derive(Debug)]
pub enum CommsEvent {
    /// Channel has stopped (clean exit or EOF).
    ChannelShutdown { channel_id: String },
    /// A chat the channel refused to serve.
    Rejected { channel_id: String, chat: String },
}

// ── State ─────────────────────────────────────────────────────────────────────

pub struct CommsState {
    bus: BusHandle,
    event_tx: mpsc::Sender<CommsEvent>,
    outbound: broadcast::Sender<String>,
}

impl CommsState {
    pub fn new(bus: BusHandle, event_tx: mpsc::Sender<CommsEvent>, outbound: broadcast::Sender<String>) -> Self {
        Self { bus, event_tx, outbound }
    }

    /// Send `content` from `channel_id` to the agents subsystem and await the
    /// reply text.
    pub async fn send_message(&self, channel_id: &str, content: String) -> Result<String, AppError> {
        let payload = BusPayload::CommsMessage { channel_id: channel_id.to_string(), content, usage: None };

        match self.bus.request("agents", payload).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("agent error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::CommsMessage { content: reply, .. })) => Ok(reply),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// `manage/status` as a JSON string.
    pub async fn management_status(&self) -> Result<String, AppError> {
        self.json_request("manage/status", BusPayload::Empty).await
    }

    /// `manage/tasks`, optionally filtered by status, as a JSON string.
    pub async fn list_tasks(&self, status: Option<String>) -> Result<String, AppError> {
        let method = match status {
            Some(s) => format!("manage/tasks/{s}"),
            None => "manage/tasks".to_string(),
        };
        self.json_request(&method, BusPayload::Empty).await
    }

    async fn json_request(&self, method: &str, payload: BusPayload) -> Result<String, AppError> {
        match self.bus.request(method, payload).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("{method} error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::JsonResponse { data })) => Ok(data),
            Ok(Ok(_)) => Err(AppError::Comms(format!("{method}: unexpected reply payload"))),
        }
    }

    /// A fresh receiver for outbound notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.outbound.subscribe()
    }

    /// Non-blocking: drops the event when the manager is not keeping up.
    pub fn report_event(&self, event: CommsEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("comms event dropped: {e}");
        }
    }
}
