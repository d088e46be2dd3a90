//! Supervisor event bus — method-addressed requests and notifications.
//!
//! Every message carries a `method` of the form `prefix/component/action`;
//! the supervisor routes on the first segment. Requests carry a oneshot
//! reply slot, notifications are fire-and-forget.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::llm::LlmUsage;

/// JSON-RPC style error codes.
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_BAD_REQUEST: i32 = -32600;
pub const ERR_INTERNAL: i32 = -32000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusError {
    pub code: i32,
    pub message: String,
}

impl BusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ERR_BAD_REQUEST, message)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for BusError {}

pub type BusResult = Result<BusPayload, BusError>;

/// When a cron schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronScheduleSpec {
    /// Fire once at a wall-clock time (past times fire immediately).
    Once { at_unix_ms: u64 },
    /// Fire every `every_secs`, first fire one interval from now.
    Interval { every_secs: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntryInfo {
    pub schedule_id: String,
    pub target_method: String,
    pub spec: CronScheduleSpec,
    pub next_fire_unix_ms: u64,
}

/// What happened to a task file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Modified,
    Removed,
}

/// Typed payloads carried on the bus. Serializable so cron can store the
/// payload it will emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusPayload {
    Empty,
    /// Text flowing between a channel and an agent, in either direction.
    CommsMessage {
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<LlmUsage>,
    },
    LlmRequest {
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system: Option<String>,
    },
    JsonResponse { data: String },
    CronSchedule {
        target_method: String,
        payload_json: String,
        spec: CronScheduleSpec,
    },
    CronScheduleResult { schedule_id: String },
    CronCancel { schedule_id: String },
    CronList,
    CronListResult { entries: Vec<CronEntryInfo> },
    TaskEvent {
        path: String,
        task_id: Option<String>,
        status: Option<String>,
        kind: TaskEventKind,
    },
    /// Outbound text for the notification chats.
    Notify { text: String },
    ToolRequest {
        tool: String,
        action: String,
        args_json: String,
    },
    ToolResponse {
        tool: String,
        action: String,
        ok: bool,
        data_json: String,
    },
}

pub enum BusMessage {
    Request {
        id: Uuid,
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
    Notification {
        method: String,
        payload: BusPayload,
    },
}

/// Transport failures talking to the supervisor (as opposed to a handler
/// replying with a [`BusError`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCallError {
    /// Supervisor is gone.
    Send,
    /// Handler dropped the reply slot.
    Recv,
    /// Bus queue is full (notifications only).
    Full,
}

impl fmt::Display for BusCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusCallError::Send => write!(f, "bus send failed: supervisor is not running"),
            BusCallError::Recv => write!(f, "bus recv failed: handler dropped reply sender"),
            BusCallError::Full => write!(f, "bus queue full"),
        }
    }
}

impl std::error::Error for BusCallError {}

/// Cloneable client handle onto the bus.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Send a request and wait for the handler's reply.
    pub async fn request(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<BusResult, BusCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Request { id: Uuid::new_v4(), method: method.into(), payload, reply_tx })
            .await
            .map_err(|_| BusCallError::Send)?;
        reply_rx.await.map_err(|_| BusCallError::Recv)
    }

    /// Fire-and-forget. Never blocks; fails when the queue is full.
    pub fn notify(&self, method: impl Into<String>, payload: BusPayload) -> Result<(), BusCallError> {
        self.tx
            .try_send(BusMessage::Notification { method: method.into(), payload })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusCallError::Full,
                mpsc::error::TrySendError::Closed(_) => BusCallError::Send,
            })
    }
}

/// Owns the supervisor-side receiver plus a handle to clone out.
pub struct SupervisorBus {
    pub rx: mpsc::Receiver<BusMessage>,
    pub handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { rx, handle: BusHandle { tx } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trip() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();

        tokio::spawn(async move {
            if let Some(BusMessage::Request { method, reply_tx, .. }) = bus.rx.recv().await {
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: method }));
            }
        });

        let reply = handle.request("manage/status", BusPayload::Empty).await.unwrap().unwrap();
        match reply {
            BusPayload::JsonResponse { data } => assert_eq!(data, "manage/status"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_reply_is_recv_error() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();
        tokio::spawn(async move {
            let _ = bus.rx.recv().await;
        });
        assert_eq!(handle.request("x/y", BusPayload::Empty).await.unwrap_err(), BusCallError::Recv);
    }

    #[test]
    fn notify_reports_full_queue() {
        let bus = SupervisorBus::new(1);
        bus.handle.notify("a/b", BusPayload::Empty).unwrap();
        assert_eq!(bus.handle.notify("a/b", BusPayload::Empty), Err(BusCallError::Full));
    }

    #[test]
    fn payload_json_round_trip_for_cron() {
        let payload = BusPayload::Notify { text: "stand-up".into() };
        let json = serde_json::to_string(&payload).unwrap();
        match serde_json::from_str::<BusPayload>(&json).unwrap() {
            BusPayload::Notify { text } => assert_eq!(text, "stand-up"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
