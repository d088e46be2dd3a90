//! Cron subsystem — timers that fire bus notifications.
//!
//! - `cron/schedule` registers a one-shot or repeating timer and replies with
//!   its id.
//! - `cron/cancel` removes a timer.
//! - `cron/list` lists active timers.
//!
//! A fired timer emits its `target_method` as an ordinary bus notification,
//! so the stand-up and triage jobs are just `agents/pm/standup` and
//! `agents/pm/triage` notifications on an interval.

mod service;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::supervisor::bus::{
    BusError, BusHandle, BusPayload, BusResult, CronScheduleSpec, ERR_METHOD_NOT_FOUND,
};
use crate::supervisor::dispatch::BusHandler;

use service::{CronCommand, CronService};

pub struct CronSubsystem {
    cmd_tx: mpsc::Sender<CronCommand>,
}

impl CronSubsystem {
    /// Spawns the timer task immediately.
    pub fn new(bus: BusHandle, shutdown: CancellationToken) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(CronService::new(bus, cmd_rx, shutdown).run());
        debug!("cron subsystem started");
        Self { cmd_tx }
    }
}

/// Send `cmd` to the service and translate its answer into a bus reply.
fn forward<T: Send + 'static>(
    cmd_tx: mpsc::Sender<CronCommand>,
    reply_tx: oneshot::Sender<BusResult>,
    make: impl FnOnce(oneshot::Sender<T>) -> CronCommand + Send + 'static,
    answer: impl FnOnce(T) -> BusResult + Send + 'static,
) {
    tokio::spawn(async move {
        let (ack_tx, ack_rx) = oneshot::channel();
        if cmd_tx.send(make(ack_tx)).await.is_err() {
            let _ = reply_tx.send(Err(BusError::internal("cron service not running")));
            return;
        }
        let result = match ack_rx.await {
            Ok(value) => answer(value),
            Err(_) => Err(BusError::internal("cron service dropped reply")),
        };
        let _ = reply_tx.send(result);
    });
}

impl BusHandler for CronSubsystem {
    fn prefix(&self) -> &str {
        "cron"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let cmd_tx = self.cmd_tx.clone();
        match (method, payload) {
            ("cron/schedule", BusPayload::CronSchedule { target_method, payload_json, spec }) => {
                if matches!(spec, CronScheduleSpec::Interval { every_secs: 0 }) {
                    let _ = reply_tx.send(Err(BusError::bad_request("interval every_secs must be > 0")));
                    return;
                }
                if serde_json::from_str::<BusPayload>(&payload_json).is_err() {
                    let _ = reply_tx.send(Err(BusError::bad_request("payload_json is not a bus payload")));
                    return;
                }
                forward(
                    cmd_tx,
                    reply_tx,
                    |reply| CronCommand::Schedule { target_method, payload_json, spec, reply },
                    |schedule_id| Ok(BusPayload::CronScheduleResult { schedule_id }),
                );
            }
            ("cron/cancel", BusPayload::CronCancel { schedule_id }) => forward(
                cmd_tx,
                reply_tx,
                |reply| CronCommand::Cancel { schedule_id, reply },
                |found| {
                    if found {
                        Ok(BusPayload::Empty)
                    } else {
                        Err(BusError::bad_request("schedule not found"))
                    }
                },
            ),
            ("cron/list", _) => forward(
                cmd_tx,
                reply_tx,
                |reply| CronCommand::List { reply },
                |entries| Ok(BusPayload::CronListResult { entries }),
            ),
            ("cron/schedule" | "cron/cancel", _) => {
                let _ = reply_tx.send(Err(BusError::bad_request(format!("{method}: wrong payload"))));
            }
            _ => {
                warn!(method, "cron: unknown method");
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("cron method not found: {method}"),
                )));
            }
        }
    }
}

/// Register a repeating notification. Returns the schedule id.
pub async fn schedule_interval(
    bus: &BusHandle,
    target_method: &str,
    payload: &BusPayload,
    every_secs: u64,
) -> Result<String, AppError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| AppError::Config(format!("cannot encode cron payload: {e}")))?;
    let reply = bus
        .request(
            "cron/schedule",
            BusPayload::CronSchedule {
                target_method: target_method.to_string(),
                payload_json,
                spec: CronScheduleSpec::Interval { every_secs },
            },
        )
        .await
        .map_err(|e| AppError::Config(e.to_string()))?;
    match reply {
        Ok(BusPayload::CronScheduleResult { schedule_id }) => Ok(schedule_id),
        Ok(other) => Err(AppError::Config(format!("unexpected cron reply: {other:?}"))),
        Err(e) => Err(AppError::Config(format!("cron/schedule failed: {e}"))),
    }
}
