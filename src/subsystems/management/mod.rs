//! Management subsystem — read-only status over the bus.
//!
//! - `manage/status` → JSON with uptime, registered handlers, the health
//!   snapshot, task counts per status, active cron schedules and flags.
//! - `manage/tasks[/<status>]` → JSON array of task summaries.
//!
//! Used by the HTTP channel and by anything else that wants a machine-readable
//! view of the bot.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::warn;

use crate::services::FeatureFlags;
use crate::supervisor::bus::{BusError, BusHandle, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::control::{ControlCommand, ControlHandle, ControlResponse};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::HealthRegistry;
use crate::tasks::{Task, TaskStatus, TaskStore};

/// Static info collected at startup.
#[derive(Debug, Clone, Serialize)]
pub struct ManagementInfo {
    pub bot_name: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub task_root: String,
}

pub struct ManagementSubsystem {
    control: ControlHandle,
    bus: BusHandle,
    health: HealthRegistry,
    store: Arc<TaskStore>,
    flags: Arc<FeatureFlags>,
    info: ManagementInfo,
}

#[derive(Serialize)]
struct TaskSummary<'a> {
    id: &'a str,
    title: &'a str,
    status: TaskStatus,
    priority: &'a str,
    assignee: Option<&'a str>,
    tags: &'a [String],
    depends_on: &'a [String],
    updated: String,
}

impl<'a> From<&'a Task> for TaskSummary<'a> {
    fn from(t: &'a Task) -> Self {
        Self {
            id: &t.meta.id,
            title: &t.meta.title,
            status: t.meta.status,
            priority: t.meta.priority.as_str(),
            assignee: t.meta.assignee.as_deref(),
            tags: &t.meta.tags,
            depends_on: &t.meta.depends_on,
            updated: t.meta.updated.to_rfc3339(),
        }
    }
}

impl ManagementSubsystem {
    pub fn new(
        control: ControlHandle,
        bus: BusHandle,
        health: HealthRegistry,
        store: Arc<TaskStore>,
        flags: Arc<FeatureFlags>,
        info: ManagementInfo,
    ) -> Self {
        Self { control, bus, health, store, flags, info }
    }

    fn tasks_json(&self, filter: Option<&str>) -> BusResult {
        let status = match filter {
            Some(s) => Some(TaskStatus::parse(s).ok_or_else(|| BusError::bad_request(format!("unknown status: {s}")))?),
            None => None,
        };
        let tasks = self.store.list(status).map_err(|e| BusError::internal(e.to_string()))?;
        let summaries: Vec<TaskSummary<'_>> = tasks.iter().map(TaskSummary::from).collect();
        let data = serde_json::to_string(&summaries).map_err(|e| BusError::internal(e.to_string()))?;
        Ok(BusPayload::JsonResponse { data })
    }

    fn status(&self, reply_tx: oneshot::Sender<BusResult>) {
        let control = self.control.clone();
        let bus = self.bus.clone();
        let health = self.health.clone();
        let store = self.store.clone();
        let flags = self.flags.clone();
        let info = self.info.clone();

        tokio::spawn(async move {
            let (uptime_ms, handlers) = match control.request(ControlCommand::Status).await {
                Ok(ControlResponse::Status { uptime_ms, handlers }) => (uptime_ms, handlers),
                Ok(other) => {
                    warn!(?other, "unexpected control response");
                    (0, Vec::new())
                }
                Err(e) => {
                    let _ = reply_tx.send(Err(BusError::internal(e.to_string())));
                    return;
                }
            };

            // Best-effort: a missing cron handler just means no schedules.
            let cron = match bus.request("cron/list", BusPayload::CronList).await {
                Ok(Ok(BusPayload::CronListResult { entries })) => entries,
                _ => Vec::new(),
            };

            let counts: serde_json::Map<String, serde_json::Value> = match store.counts() {
                Ok(c) => c.into_iter().map(|(s, n)| (s.dir_name().to_string(), json!(n))).collect(),
                Err(e) => {
                    warn!(error = %e, "task counts unavailable");
                    serde_json::Map::new()
                }
            };

            let snapshot = health.snapshot().await;
            let healthy = snapshot.iter().all(|h| h.healthy);
            let flags: serde_json::Map<String, serde_json::Value> =
                flags.list().into_iter().map(|(k, v)| (k, json!(v))).collect();

            let body = json!({
                "status": if healthy { "ok" } else { "degraded" },
                "healthy": healthy,
                "uptime_ms": uptime_ms,
                "info": info,
                "handlers": handlers,
                "health": snapshot,
                "tasks": counts,
                "cron": cron,
                "flags": flags,
            });
            let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data: body.to_string() }));
        });
    }
}

impl BusHandler for ManagementSubsystem {
    fn prefix(&self) -> &str {
        "manage"
    }

    fn handle_request(&self, method: &str, _payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let mut parts = method.splitn(3, '/').skip(1);
        match (parts.next(), parts.next()) {
            (Some("status"), None) => self.status(reply_tx),
            (Some("tasks"), filter) => {
                let _ = reply_tx.send(self.tasks_json(filter));
            }
            _ => {
                let _ = reply_tx.send(Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("method not found: {method}"))));
            }
        }
    }
}
