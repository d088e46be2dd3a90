//! Subsystem request handlers.
//!
//! Each subsystem implements [`BusHandler`] and registers under its
//! [`BusHandler::prefix`]. Method strings look like `prefix/component/action`;
//! the supervisor matches the first segment and passes the full method on so
//! the handler can route the rest itself.

use tokio::sync::oneshot;

use crate::supervisor::bus::{BusPayload, BusResult};

pub trait BusHandler: Send + Sync {
    /// The method prefix this handler owns (e.g. `"agents"`, `"tools"`).
    /// Must be unique across registered handlers.
    fn prefix(&self) -> &str;

    /// Handle a request, taking ownership of `reply_tx`.
    ///
    /// Implementations **must not block** the supervisor loop: either reply
    /// synchronously or move `reply_tx` into a spawned task.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>);

    /// Handle a notification. Default: ignore.
    fn handle_notification(&self, _method: &str, _payload: BusPayload) {}
}
