//! Agents subsystem — the PM agent and the role specialists.
//!
//! Method grammar:
//! - `agents`                     → agent picked by channel routing, default action
//! - `agents/{agent_id}`          → explicit agent, default action
//! - `agents/{agent_id}/{action}` → explicit agent and action
//!
//! Requests carry a `CommsMessage` and are answered with one. Each request
//! runs in its own task so LLM round-trips never stall the supervisor.
//! Notifications (`agents/pm/standup`, `agents/pm/triage`,
//! `agents/pm/task_changed`) come from cron and the watcher.

pub mod commands;
pub mod pm;
pub mod prompt;
pub mod specialist;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::AgentsConfig;
use crate::error::AppError;
use crate::services::{FeatureFlags, Permissions};
use crate::subsystems::comms::NOTIFY_SEND_METHOD;
use crate::subsystems::tools::EXECUTE_METHOD;
use crate::supervisor::bus::{BusError, BusHandle, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::HealthRegistry;
use crate::tasks::TaskStore;

use specialist::Role;

pub const PM_AGENT: &str = "pm";
const DEFAULT_ACTION: &str = "handle";

/// Everything an agent may touch. Shared by every in-flight request.
pub struct AgentsState {
    pub store: Arc<TaskStore>,
    pub permissions: Arc<Permissions>,
    pub flags: Arc<FeatureFlags>,
    pub health: HealthRegistry,
    pub prompts_dir: PathBuf,
    pub bot_name: String,
    bus: BusHandle,
}

impl AgentsState {
    pub fn new(
        bus: BusHandle,
        store: Arc<TaskStore>,
        permissions: Arc<Permissions>,
        flags: Arc<FeatureFlags>,
        health: HealthRegistry,
        prompts_dir: PathBuf,
        bot_name: impl Into<String>,
    ) -> Self {
        Self { store, permissions, flags, health, prompts_dir, bot_name: bot_name.into(), bus }
    }

    /// One LLM completion through `llm/complete`.
    pub async fn complete(&self, channel_id: &str, content: String, system: Option<String>) -> Result<String, AppError> {
        let payload = BusPayload::LlmRequest { channel_id: channel_id.to_string(), content, system };
        match self.bus.request("llm/complete", payload).await {
            Err(e) => Err(AppError::Llm(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Llm(e.message)),
            Ok(Ok(BusPayload::CommsMessage { content, .. })) => Ok(content),
            Ok(Ok(_)) => Err(AppError::Llm("unexpected reply payload".into())),
        }
    }

    /// Run a tool through `tools/execute` and return its JSON output.
    pub async fn tool(&self, tool: &str, action: &str, args: Value) -> Result<Value, AppError> {
        let payload = BusPayload::ToolRequest { tool: tool.into(), action: action.into(), args_json: args.to_string() };
        match self.bus.request(EXECUTE_METHOD, payload).await {
            Err(e) => Err(AppError::Tool(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Tool(e.message)),
            Ok(Ok(BusPayload::ToolResponse { ok, data_json, .. })) => {
                let data: Value = serde_json::from_str(&data_json).unwrap_or(Value::Null);
                if ok {
                    Ok(data)
                } else {
                    let msg = data.get("error").and_then(Value::as_str).unwrap_or("tool failed");
                    Err(AppError::Tool(msg.to_string()))
                }
            }
            Ok(Ok(_)) => Err(AppError::Tool("unexpected reply payload".into())),
        }
    }

    /// Ask another agent through the bus, e.g. a specialist review.
    pub async fn ask_agent(&self, method: String, channel_id: &str, content: String) -> Result<String, AppError> {
        let payload = BusPayload::CommsMessage { channel_id: channel_id.to_string(), content, usage: None };
        match self.bus.request(method, payload).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(e.message)),
            Ok(Ok(BusPayload::CommsMessage { content, .. })) => Ok(content),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".into())),
        }
    }

    /// Push text to the notification chats. Fire-and-forget.
    pub fn notify(&self, text: String) {
        if let Err(e) = self.bus.notify(NOTIFY_SEND_METHOD, BusPayload::Notify { text }) {
            warn!(error = %e, "notification dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentId {
    Pm,
    Specialist(Role),
}

impl AgentId {
    pub fn parse(s: &str) -> Option<AgentId> {
        if s.eq_ignore_ascii_case(PM_AGENT) {
            Some(AgentId::Pm)
        } else {
            Role::parse(s).map(AgentId::Specialist)
        }
    }
}

pub struct AgentsSubsystem {
    state: Arc<AgentsState>,
    default_agent: AgentId,
    channel_map: HashMap<String, AgentId>,
}

impl AgentsSubsystem {
    pub fn new(config: &AgentsConfig, state: AgentsState) -> Self {
        let default_agent = AgentId::parse(&config.default_agent).unwrap_or_else(|| {
            warn!(agent = %config.default_agent, "unknown default agent, using pm");
            AgentId::Pm
        });

        let channel_map = config
            .channel_map
            .iter()
            .filter_map(|(channel, agent)| match AgentId::parse(agent) {
                Some(id) => Some((channel.clone(), id)),
                None => {
                    warn!(%channel, %agent, "routing to unknown agent ignored");
                    None
                }
            })
            .collect();

        Self { state: Arc::new(state), default_agent, channel_map }
    }

    pub fn state(&self) -> Arc<AgentsState> {
        self.state.clone()
    }

    fn resolve_agent(&self, method_agent: Option<&str>, channel_id: &str) -> Result<AgentId, BusError> {
        match method_agent {
            Some(name) => AgentId::parse(name)
                .ok_or_else(|| BusError::new(ERR_METHOD_NOT_FOUND, format!("agent not found: {name}"))),
            None => Ok(self.channel_map.get(channel_id).copied().unwrap_or(self.default_agent)),
        }
    }
}

fn parse_method(method: &str) -> Result<(Option<&str>, &str), BusError> {
    let parts: Vec<&str> = method.split('/').collect();
    match parts.as_slice() {
        ["agents"] => Ok((None, DEFAULT_ACTION)),
        ["agents", agent] => Ok((Some(*agent), DEFAULT_ACTION)),
        ["agents", agent, action] => Ok((Some(*agent), *action)),
        _ => Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("method not found: {method}"))),
    }
}

async fn run_agent(
    state: &AgentsState,
    agent: AgentId,
    action: &str,
    channel_id: &str,
    content: &str,
) -> Result<String, BusError> {
    match (agent, action) {
        (AgentId::Pm, DEFAULT_ACTION) => Ok(pm::handle_message(state, channel_id, content).await),
        (AgentId::Pm, "standup") => Ok(pm::standup(state)),
        (AgentId::Pm, "triage") => Ok(pm::triage(state, channel_id).await),
        (AgentId::Specialist(role), DEFAULT_ACTION | "review") => {
            specialist::review(state, role, channel_id, content.trim())
                .await
                .map_err(|e| BusError::internal(e.to_string()))
        }
        (_, other) => Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("agent action not found: {other}"))),
    }
}

impl BusHandler for AgentsSubsystem {
    fn prefix(&self) -> &str {
        "agents"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let (method_agent, action) = match parse_method(method) {
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = reply_tx.send(Err(e));
                return;
            }
        };

        let BusPayload::CommsMessage { channel_id, content, .. } = payload else {
            let _ = reply_tx.send(Err(BusError::bad_request(format!("{method} requires CommsMessage payload"))));
            return;
        };

        let agent = match self.resolve_agent(method_agent, &channel_id) {
            Ok(a) => a,
            Err(e) => {
                let _ = reply_tx.send(Err(e));
                return;
            }
        };

        debug!(%channel_id, ?agent, %action, "agent request");
        let state = self.state.clone();
        let action = action.to_string();
        tokio::spawn(async move {
            let result = run_agent(&state, agent, &action, &channel_id, &content)
                .await
                .map(|text| BusPayload::CommsMessage { channel_id, content: text, usage: None });
            let _ = reply_tx.send(result);
        });
    }

    fn handle_notification(&self, method: &str, payload: BusPayload) {
        let state = self.state.clone();
        match (method, payload) {
            ("agents/pm/standup", _) => {
                tokio::spawn(async move { pm::scheduled_standup(&state) });
            }
            ("agents/pm/triage", _) => {
                tokio::spawn(async move { pm::scheduled_triage(&state).await });
            }
            ("agents/pm/task_changed", BusPayload::TaskEvent { task_id, status, kind, .. }) => {
                tokio::spawn(async move { pm::task_changed(&state, task_id, status, kind) });
            }
            (other, _) => debug!(method = other, "agents: ignored notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_grammar() {
        assert_eq!(parse_method("agents").unwrap(), (None, "handle"));
        assert_eq!(parse_method("agents/qa").unwrap(), (Some("qa"), "handle"));
        assert_eq!(parse_method("agents/pm/standup").unwrap(), (Some("pm"), "standup"));
        assert!(parse_method("agents/pm/a/b").is_err());
    }

    #[test]
    fn agent_ids() {
        assert_eq!(AgentId::parse("PM"), Some(AgentId::Pm));
        assert_eq!(AgentId::parse("backend"), Some(AgentId::Specialist(Role::Backend)));
        assert_eq!(AgentId::parse("janitor"), None);
    }
}
