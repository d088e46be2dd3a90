//! Supervisor — owns the event bus and routes messages between subsystems.

pub mod bus;
pub mod control;
pub mod dispatch;
pub mod health;

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use bus::{BusError, BusMessage, ERR_METHOD_NOT_FOUND, SupervisorBus};
use control::{ControlCommand, ControlMessage, ControlResponse, SupervisorControl};
use dispatch::BusHandler;

/// Run the supervisor loop until `shutdown` is cancelled.
///
/// The supervisor is a pure router: the first `/` segment of each method
/// selects the [`BusHandler`], which takes ownership of the reply slot.
///
/// # Panics
///
/// Panics at startup if two handlers share a prefix.
pub async fn run(
    mut bus: SupervisorBus,
    mut control: SupervisorControl,
    shutdown: CancellationToken,
    handlers: Vec<Box<dyn BusHandler>>,
) {
    let mut table: HashMap<String, Box<dyn BusHandler>> = HashMap::new();
    for h in handlers {
        let prefix = h.prefix().to_string();
        debug!(%prefix, "registering bus handler");
        if table.insert(prefix.clone(), h).is_some() {
            panic!("duplicate BusHandler prefix registered: {prefix:?}");
        }
    }

    let mut handler_ids: Vec<String> = table.keys().cloned().collect();
    handler_ids.sort();
    info!(handlers = ?handler_ids, "supervisor ready");

    let started_at = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("supervisor shutting down");
                break;
            }

            Some(ControlMessage { command, reply_tx }) = control.rx.recv() => {
                let uptime_ms = started_at.elapsed().as_millis() as u64;
                let response = match command {
                    ControlCommand::Health => ControlResponse::Health { uptime_ms },
                    ControlCommand::Status => ControlResponse::Status {
                        uptime_ms,
                        handlers: handler_ids.clone(),
                    },
                    ControlCommand::Shutdown => {
                        info!("control requested supervisor shutdown");
                        shutdown.cancel();
                        ControlResponse::Ack { message: "shutdown requested".to_string() }
                    }
                };
                let _ = reply_tx.send(response);
            }

            msg = bus.rx.recv() => {
                match msg {
                    Some(BusMessage::Request { id, method, payload, reply_tx }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%id, %method, "routing request");
                                trace!(%id, %method, payload = ?payload, "request payload");
                                handler.handle_request(&method, payload, reply_tx);
                            }
                            None => {
                                warn!(%id, %method, "unhandled request method — replying with error");
                                let _ = reply_tx.send(Err(BusError::new(
                                    ERR_METHOD_NOT_FOUND,
                                    format!("method not found: {method}"),
                                )));
                            }
                        }
                    }
                    Some(BusMessage::Notification { method, payload }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%method, "routing notification");
                                trace!(%method, payload = ?payload, "notification payload");
                                handler.handle_notification(&method, payload);
                            }
                            None => debug!(%method, "unhandled notification — no handler for prefix"),
                        }
                    }
                    None => {
                        info!("bus closed, supervisor exiting");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::bus::{BusPayload, BusResult};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl BusHandler for Echo {
        fn prefix(&self) -> &str {
            "echo"
        }

        fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
            let _ = method;
            let _ = reply_tx.send(Ok(payload));
        }

        fn handle_notification(&self, method: &str, _payload: BusPayload) {
            self.seen.lock().unwrap().push(method.to_string());
        }
    }

    fn start(seen: Arc<Mutex<Vec<String>>>) -> (bus::BusHandle, control::ControlHandle, CancellationToken) {
        let bus = SupervisorBus::new(16);
        let control = SupervisorControl::new(4);
        let (bus_handle, control_handle) = (bus.handle.clone(), control.handle.clone());
        let shutdown = CancellationToken::new();
        let handlers: Vec<Box<dyn BusHandler>> = vec![Box::new(Echo { seen })];
        tokio::spawn(run(bus, control, shutdown.clone(), handlers));
        (bus_handle, control_handle, shutdown)
    }

    #[tokio::test]
    async fn routes_by_prefix_and_rejects_unknown() {
        let (bus, _control, shutdown) = start(Arc::new(Mutex::new(Vec::new())));

        let reply = bus
            .request("echo/anything", BusPayload::Notify { text: "hi".into() })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reply, BusPayload::Notify { text } if text == "hi"));

        let err = bus.request("nobody/home", BusPayload::Empty).await.unwrap().unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn notifications_reach_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (bus, _control, shutdown) = start(seen.clone());

        bus.notify("echo/ping", BusPayload::Empty).unwrap();
        // A request behind the notification proves it was processed first.
        bus.request("echo/sync", BusPayload::Empty).await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["echo/ping"]);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn control_status_and_shutdown() {
        let (_bus, control, shutdown) = start(Arc::new(Mutex::new(Vec::new())));

        match control.request(ControlCommand::Status).await.unwrap() {
            ControlResponse::Status { handlers, .. } => assert_eq!(handlers, vec!["echo"]),
            other => panic!("unexpected {other:?}"),
        }
        control.request(ControlCommand::Shutdown).await.unwrap();
        assert!(shutdown.is_cancelled());
    }
}
