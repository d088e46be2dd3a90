//! `notify/*` bus handler — fans outbound text out to the chat channels.
//!
//! Agents never talk to a channel directly. They send `notify/send` (as a
//! request or a notification) and every running channel subscribed to the
//! broadcast relays the text to its notification targets.

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;

pub const NOTIFY_SEND_METHOD: &str = "notify/send";

pub struct NotifySubsystem {
    outbound: broadcast::Sender<String>,
}

impl NotifySubsystem {
    pub fn new(outbound: broadcast::Sender<String>) -> Self {
        Self { outbound }
    }

    /// Returns the number of channels that received the text.
    fn publish(&self, text: String) -> usize {
        match self.outbound.send(text) {
            Ok(n) => {
                debug!(receivers = n, "notification published");
                n
            }
            Err(_) => {
                debug!("notification dropped: no channel is listening");
                0
            }
        }
    }
}

impl BusHandler for NotifySubsystem {
    fn prefix(&self) -> &str {
        "notify"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let result = match (method, payload) {
            (NOTIFY_SEND_METHOD, BusPayload::Notify { text }) => {
                let receivers = self.publish(text);
                Ok(BusPayload::JsonResponse { data: serde_json::json!({ "receivers": receivers }).to_string() })
            }
            (NOTIFY_SEND_METHOD, _) => Err(BusError::bad_request("notify/send requires Notify payload")),
            (other, _) => Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("notify method not found: {other}"))),
        };
        let _ = reply_tx.send(result);
    }

    fn handle_notification(&self, method: &str, payload: BusPayload) {
        match (method, payload) {
            (NOTIFY_SEND_METHOD, BusPayload::Notify { text }) => {
                self.publish(text);
            }
            (other, _) => warn!(method = other, "notify: ignored notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_every_subscriber() {
        let (tx, mut a) = broadcast::channel(8);
        let mut b = tx.subscribe();
        let sub = NotifySubsystem::new(tx);

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(NOTIFY_SEND_METHOD, BusPayload::Notify { text: "stand-up".into() }, reply_tx);
        match reply_rx.await.unwrap().unwrap() {
            BusPayload::JsonResponse { data } => assert!(data.contains("\"receivers\":2")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.recv().await.unwrap(), "stand-up");
        assert_eq!(b.recv().await.unwrap(), "stand-up");

        sub.handle_notification(NOTIFY_SEND_METHOD, BusPayload::Notify { text: "moved".into() });
        assert_eq!(a.recv().await.unwrap(), "moved");
    }

    #[tokio::test]
    async fn no_listeners_is_not_an_error() {
        let (tx, rx) = broadcast::channel::<String>(8);
        drop(rx);
        let sub = NotifySubsystem::new(tx);
        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(NOTIFY_SEND_METHOD, BusPayload::Notify { text: "x".into() }, reply_tx);
        assert!(reply_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wrong_payload_and_unknown_method() {
        let (tx, _rx) = broadcast::channel::<String>(8);
        let sub = NotifySubsystem::new(tx);

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(NOTIFY_SEND_METHOD, BusPayload::Empty, reply_tx);
        assert!(reply_rx.await.unwrap().is_err());

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request("notify/shout", BusPayload::Empty, reply_tx);
        assert_eq!(reply_rx.await.unwrap().unwrap_err().code, ERR_METHOD_NOT_FOUND);
    }
}
