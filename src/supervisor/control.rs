//! Supervisor control plane, separate from bus method routing.
//!
//! Used by management and the HTTP channel to ask the supervisor itself for
//! uptime, registered handlers, or a shutdown.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlCommand {
    Health,
    Status,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    Health { uptime_ms: u64 },
    Status { uptime_ms: u64, handlers: Vec<String> },
    Ack { message: String },
}

#[derive(Debug)]
pub struct ControlMessage {
    pub command: ControlCommand,
    pub reply_tx: oneshot::Sender<ControlResponse>,
}

#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlHandle {
    pub async fn request(&self, command: ControlCommand) -> Result<ControlResponse, ControlCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage { command, reply_tx })
            .await
            .map_err(|_| ControlCallError::Send)?;
        reply_rx.await.map_err(|_| ControlCallError::Recv)
    }
}

/// Owns the supervisor-side control receiver.
pub struct SupervisorControl {
    pub rx: mpsc::Receiver<ControlMessage>,
    pub handle: ControlHandle,
}

impl SupervisorControl {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { rx, handle: ControlHandle { tx } }
    }
}

#[derive(Debug)]
pub enum ControlCallError {
    Send,
    Recv,
}

impl fmt::Display for ControlCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCallError::Send => write!(f, "control send failed: supervisor is not running"),
            ControlCallError::Recv => write!(f, "control recv failed: supervisor dropped reply sender"),
        }
    }
}

impl std::error::Error for ControlCallError {}
