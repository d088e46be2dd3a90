//! Tools subsystem — `tools/execute` over the git wrapper and the test runner.
//!
//! | tool    | action   | args                         |
//! |---------|----------|------------------------------|
//! | `git`   | `status` |                              |
//! | `git`   | `branch` | `task_id`, `title`           |
//! | `git`   | `commit` | `message`, optional `role`   |
//! | `git`   | `push`   |                              |
//! | `git`   | `pr`     | `title`, `body`              |
//! | `tests` | `run`    |                              |
//!
//! `commit`, `push` and `pr` only run while the `git_automation` flag is on.
//! A failed tool still replies `Ok(ToolResponse { ok: false, .. })` with
//! `{"error": "..."}` in `data_json`; bus errors are kept for malformed
//! requests.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::services::flags::{self, FeatureFlags};
use crate::services::{GitRepo, Permissions, TestRunner};
use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;

pub const EXECUTE_METHOD: &str = "tools/execute";

#[derive(Clone)]
struct Tools {
    git: Arc<GitRepo>,
    tests: Arc<TestRunner>,
    permissions: Arc<Permissions>,
    flags: Arc<FeatureFlags>,
}

pub struct ToolsSubsystem {
    tools: Tools,
}

impl ToolsSubsystem {
    pub fn new(git: GitRepo, tests: TestRunner, permissions: Arc<Permissions>, flags: Arc<FeatureFlags>) -> Self {
        Self { tools: Tools { git: Arc::new(git), tests: Arc::new(tests), permissions, flags } }
    }
}

fn arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    arg(args, key).ok_or_else(|| format!("missing argument: {key}"))
}

impl Tools {
    fn require_automation(&self, action: &str) -> Result<(), String> {
        if self.flags.is_enabled(flags::GIT_AUTOMATION) {
            Ok(())
        } else {
            Err(format!("git {action} is disabled (flag {} is off)", flags::GIT_AUTOMATION))
        }
    }

    async fn execute(&self, tool: &str, action: &str, args: &Value) -> Result<Value, String> {
        match (tool, action) {
            ("git", "status") => {
                let files = self.git.status().await.map_err(|e| e.to_string())?;
                Ok(json!({ "files": files }))
            }
            ("git", "branch") => {
                let task_id = required(args, "task_id")?;
                let title = arg(args, "title").unwrap_or(task_id);
                let branch = self.git.create_task_branch(task_id, title).await.map_err(|e| e.to_string())?;
                Ok(json!({ "branch": branch }))
            }
            ("git", "commit") => {
                self.require_automation("commit")?;
                let message = required(args, "message")?;
                let hash = self
                    .git
                    .commit(message, arg(args, "role"), &self.permissions)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "commit": hash }))
            }
            ("git", "push") => {
                self.require_automation("push")?;
                let branch = self.git.push().await.map_err(|e| e.to_string())?;
                Ok(json!({ "branch": branch }))
            }
            ("git", "pr") => {
                self.require_automation("pr")?;
                let title = required(args, "title")?;
                let body = arg(args, "body").unwrap_or_default();
                let url = self.git.open_pr(title, body).await.map_err(|e| e.to_string())?;
                Ok(json!({ "url": url }))
            }
            ("tests", "run") => {
                let report = self.tests.run().await.map_err(|e| e.to_string())?;
                serde_json::to_value(&report).map_err(|e| e.to_string())
            }
            _ => Err(format!("unknown tool action: {tool}/{action}")),
        }
    }
}

impl BusHandler for ToolsSubsystem {
    fn prefix(&self) -> &str {
        "tools"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        if method != EXECUTE_METHOD {
            let _ = reply_tx.send(Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("method not found: {method}"))));
            return;
        }

        let BusPayload::ToolRequest { tool, action, args_json } = payload else {
            let _ = reply_tx.send(Err(BusError::bad_request("expected ToolRequest payload")));
            return;
        };

        let args: Value = if args_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&args_json) {
                Ok(v) => v,
                Err(e) => {
                    let _ = reply_tx.send(Err(BusError::bad_request(format!("args_json is not JSON: {e}"))));
                    return;
                }
            }
        };

        let tools = self.tools.clone();
        debug!(%tool, %action, "tool request");
        tokio::spawn(async move {
            let (ok, data) = match tools.execute(&tool, &action, &args).await {
                Ok(data) => {
                    info!(%tool, %action, "tool succeeded");
                    (true, data)
                }
                Err(e) => {
                    warn!(%tool, %action, error = %e, "tool failed");
                    (false, json!({ "error": e }))
                }
            };
            let _ = reply_tx.send(Ok(BusPayload::ToolResponse { tool, action, ok, data_json: data.to_string() }));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn subsystem(dir: &TempDir, test_command: &str) -> ToolsSubsystem {
        ToolsSubsystem::new(
            GitRepo::new(dir.path(), "origin", "main"),
            TestRunner::new(test_command, dir.path(), 5, 5),
            Arc::new(Permissions::new(&HashMap::new())),
            Arc::new(FeatureFlags::new(&HashMap::new())),
        )
    }

    async fn call(sub: &ToolsSubsystem, tool: &str, action: &str, args: Value) -> BusResult {
        let (tx, rx) = oneshot::channel();
        let payload = BusPayload::ToolRequest { tool: tool.into(), action: action.into(), args_json: args.to_string() };
        sub.handle_request(EXECUTE_METHOD, payload, tx);
        rx.await.unwrap()
    }

    fn response(result: BusResult) -> (bool, Value) {
        match result.unwrap() {
            BusPayload::ToolResponse { ok, data_json, .. } => (ok, serde_json::from_str(&data_json).unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_reports_success() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir, "true");
        let (ok, data) = response(call(&sub, "tests", "run", json!({})).await);
        assert!(ok);
        assert_eq!(data["success"], true);
    }

    #[tokio::test]
    async fn git_automation_flag_gates_commit() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir, "true");
        let (ok, data) = response(call(&sub, "git", "commit", json!({ "message": "wip" })).await);
        assert!(!ok);
        assert!(data["error"].as_str().unwrap().contains("git_automation"));
    }

    #[tokio::test]
    async fn missing_arguments_and_unknown_actions() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir, "true");

        let (ok, data) = response(call(&sub, "git", "branch", json!({})).await);
        assert!(!ok);
        assert_eq!(data["error"], "missing argument: task_id");

        let (ok, _) = response(call(&sub, "docker", "build", json!({})).await);
        assert!(!ok);
    }

    #[tokio::test]
    async fn malformed_requests_are_bus_errors() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir, "true");

        let (tx, rx) = oneshot::channel();
        sub.handle_request(EXECUTE_METHOD, BusPayload::Empty, tx);
        assert!(rx.await.unwrap().is_err());

        let (tx, rx) = oneshot::channel();
        let payload = BusPayload::ToolRequest { tool: "git".into(), action: "status".into(), args_json: "{nope".into() };
        sub.handle_request(EXECUTE_METHOD, payload, tx);
        assert!(rx.await.unwrap().is_err());

        let (tx, rx) = oneshot::channel();
        sub.handle_request("tools/list", BusPayload::Empty, tx);
        assert_eq!(rx.await.unwrap().unwrap_err().code, ERR_METHOD_NOT_FOUND);
    }
}
