//! The PM agent — turns chat into task-file operations.
//!
//! Slash commands map one-to-one onto store, tool and flag operations (see
//! [`commands::HELP`]). Anything else is a request for a new task: the LLM
//! drafts `{title, description, priority, assignee, tags}` as JSON, and when
//! that fails the first line of the message becomes the title.
//!
//! Replies are always text. User mistakes (unknown id, illegal move) come back
//! as `error: ...` lines rather than bus errors.

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::AgentsState;
use super::commands::{self, Command};
use super::prompt::preamble;
use super::specialist::Role;
use crate::error::AppError;
use crate::services::flags::{self, parse_switch};
use crate::services::TestReport;
use crate::supervisor::bus::TaskEventKind;
use crate::tasks::{Priority, Task, TaskDraft, TaskPatch, TaskStatus};

const TITLE_MAX: usize = 80;
const DEFAULT_ARCHIVE_DAYS: i64 = 7;
const MAX_ARCHIVE_DAYS: i64 = 36_500;

const DRAFT_FALLBACK: &str = "\
Turn the user's request into a single task for the team's queue.
Reply with one JSON object and nothing else:
{\"title\": \"short imperative title\", \"description\": \"what and why, with acceptance criteria\",
 \"priority\": \"low|medium|high|critical\", \"assignee\": \"one of: {{roles}}, or null\", \"tags\": [\"...\"]}";

const TRIAGE_FALLBACK: &str = "\
You triage the team's inbox. For the task below pick a priority and the role
best placed to do it. Reply with one JSON object and nothing else:
{\"priority\": \"low|medium|high|critical\", \"assignee\": \"one of: {{roles}}\"}";

// ── Entry points ──────────────────────────────────────────────────────────────

/// Handle one chat message and return the reply text.
pub async fn handle_message(state: &AgentsState, channel_id: &str, content: &str) -> String {
    let result = match commands::parse(content) {
        Some(cmd) => run_command(state, channel_id, cmd).await,
        None if content.trim().is_empty() => Ok(commands::HELP.to_string()),
        None => create_task(state, channel_id, content).await,
    };
    result.unwrap_or_else(|e| {
        debug!(%channel_id, error = %e, "pm command failed");
        format!("error: {e}")
    })
}

async fn run_command(state: &AgentsState, channel_id: &str, cmd: Command) -> Result<String, AppError> {
    let store = &state.store;
    match cmd {
        Command::Help => Ok(commands::HELP.to_string()),
        Command::Usage(usage) => Ok(format!("usage: {usage}")),
        Command::Unknown(name) => Ok(format!("unknown command /{name}. Try /help.")),

        Command::New(text) => create_task(state, channel_id, &text).await,

        Command::List(filter) => {
            let status = filter.as_deref().map(parse_status).transpose()?;
            let tasks = store.list(status)?;
            if tasks.is_empty() {
                return Ok("no tasks".to_string());
            }
            Ok(tasks.iter().map(Task::summary_line).collect::<Vec<_>>().join("\n"))
        }

        Command::Show(id) => Ok(render_task(&store.get(&id)?)),

        Command::Move { id, status } => {
            let task = store.transition(&id, parse_status(&status)?)?;
            Ok(format!("{} moved to {}", task.id(), task.status()))
        }

        Command::Assign { id, assignee } => {
            let assignee = match assignee.to_ascii_lowercase().as_str() {
                "none" | "-" | "nobody" => None,
                other => Some(Role::parse(other).map_or_else(|| other.to_string(), |r| r.to_string())),
            };
            let task = store.assign(&id, assignee.as_deref())?;
            Ok(match &task.meta.assignee {
                Some(a) => format!("{} assigned to {a}", task.id()),
                None => format!("{} unassigned", task.id()),
            })
        }

        Command::Priority { id, level } => {
            let priority = Priority::parse(&level)
                .ok_or_else(|| AppError::Config(format!("unknown priority: {level} (low, medium, high, critical)")))?;
            let task = store.update(&id, TaskPatch { priority: Some(priority), ..Default::default() })?;
            Ok(format!("{} priority set to {}", task.id(), task.meta.priority))
        }

        Command::Note { id, text } => {
            let task = store.update(&id, TaskPatch { note: Some(text), ..Default::default() })?;
            Ok(format!("note added to {}", task.id()))
        }

        Command::Triage => Ok(triage(state, channel_id).await),
        Command::Standup => Ok(standup(state)),

        Command::Ask { role, id } => {
            let role = Role::parse(&role)
                .ok_or_else(|| AppError::Config(format!("unknown role: {role} ({})", Role::names())))?;
            state.ask_agent(format!("agents/{role}/review"), channel_id, id).await
        }

        Command::Can { role, action, path } => {
            Ok(match state.permissions.matching_pattern(&role, &action, &path) {
                Some(pattern) => format!("yes: {role} may {action} {path} (matches {pattern})"),
                None => format!("no: {role} may not {action} {path}"),
            })
        }

        Command::Flags => Ok(state
            .flags
            .list()
            .into_iter()
            .map(|(name, on)| format!("{name}: {}", if on { "on" } else { "off" }))
            .collect::<Vec<_>>()
            .join("\n")),

        Command::Flag { name, value } => {
            let enabled = parse_switch(&value).ok_or_else(|| AppError::Config(format!("expected on or off, got {value}")))?;
            state.flags.set(&name, enabled);
            info!(flag = %name, enabled, "feature flag changed from chat");
            Ok(format!("{name} is now {}", if enabled { "on" } else { "off" }))
        }

        Command::Health => Ok(state.health.render().await),

        Command::Branch(id) => {
            let task = store.get(&id)?;
            let out = state
                .tool("git", "branch", json!({ "task_id": task.id(), "title": task.meta.title }))
                .await?;
            let branch = out.get("branch").and_then(|b| b.as_str()).unwrap_or_default();
            Ok(format!("created branch {branch} for {}", task.id()))
        }

        Command::Test => {
            let out = state.tool("tests", "run", json!({})).await?;
            let report: TestReport =
                serde_json::from_value(out).map_err(|e| AppError::Tool(format!("bad test report: {e}")))?;
            if report.summary.is_empty() {
                Ok(report.headline())
            } else {
                Ok(format!("{}\n{}", report.headline(), report.summary))
            }
        }

        Command::Archive(days) => {
            let days = match days {
                Some(d) => d.parse::<i64>().map_err(|_| AppError::Config(format!("not a number of days: {d}")))?,
                None => DEFAULT_ARCHIVE_DAYS,
            };
            if !(0..=MAX_ARCHIVE_DAYS).contains(&days) {
                return Err(AppError::Config(format!("archive age must be 0..={MAX_ARCHIVE_DAYS} days, got {days}")));
            }
            let age = Duration::try_days(days)
                .ok_or_else(|| AppError::Config(format!("archive age out of range: {days} days")))?;
            let moved = store.archive_completed(age)?;
            Ok(if moved.is_empty() {
                format!("nothing completed more than {days} days ago")
            } else {
                format!("archived {}", moved.join(", "))
            })
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, AppError> {
    TaskStatus::parse(s).ok_or_else(|| AppError::Config(format!("unknown status: {s}")))
}

fn render_task(task: &Task) -> String {
    let mut out = task.summary_line();
    if !task.meta.tags.is_empty() {
        out.push_str(&format!("\ntags: {}", task.meta.tags.join(", ")));
    }
    if !task.meta.depends_on.is_empty() {
        out.push_str(&format!("\ndepends on: {}", task.meta.depends_on.join(", ")));
    }
    out.push_str(&format!("\nupdated: {}", task.meta.updated.format("%Y-%m-%d %H:%M UTC")));
    let body = task.body.trim();
    if !body.is_empty() {
        out.push_str("\n\n");
        out.push_str(body);
    }
    out
}

// ── Drafting ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DraftReply {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TriageReply {
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
}

/// The outermost `{ ... }` in an LLM reply, which may wrap it in prose or a
/// code fence.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Known roles are normalised; anything else (a person's name) is kept.
fn normalise_assignee(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(Role::parse(raw).map_or_else(|| raw.to_string(), |r| r.to_string()))
}

fn parse_draft(reply: &str) -> Option<TaskDraft> {
    let parsed: DraftReply = serde_json::from_str(extract_json(reply)?).ok()?;
    let title = parsed.title.trim();
    if title.is_empty() {
        return None;
    }
    Some(TaskDraft {
        title: truncate(title, TITLE_MAX),
        body: parsed.description.trim().to_string(),
        priority: parsed.priority.as_deref().and_then(Priority::parse),
        assignee: normalise_assignee(parsed.assignee),
        tags: parsed.tags.into_iter().map(|t| t.trim().to_ascii_lowercase()).filter(|t| !t.is_empty()).collect(),
        depends_on: Vec::new(),
    })
}

/// First non-empty line as the title, the whole text as the body.
fn fallback_draft(text: &str) -> TaskDraft {
    let title = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("Untitled task");
    TaskDraft { title: truncate(title, TITLE_MAX), body: text.trim().to_string(), ..TaskDraft::default() }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut.trim_end())
    }
}

async fn draft_task(state: &AgentsState, channel_id: &str, text: &str) -> TaskDraft {
    if !state.flags.is_enabled(flags::LLM_DRAFTING) {
        return fallback_draft(text);
    }
    let system = preamble(&state.prompts_dir, &state.bot_name)
        .layer_or("pm_draft.md", DRAFT_FALLBACK)
        .var("roles", Role::names())
        .build();

    match state.complete(channel_id, text.to_string(), Some(system)).await {
        Ok(reply) => parse_draft(&reply).unwrap_or_else(|| {
            debug!(%channel_id, "llm draft was not usable JSON, falling back to first line");
            fallback_draft(text)
        }),
        Err(e) => {
            warn!(%channel_id, error = %e, "llm drafting failed, falling back to first line");
            fallback_draft(text)
        }
    }
}

async fn create_task(state: &AgentsState, channel_id: &str, text: &str) -> Result<String, AppError> {
    let draft = draft_task(state, channel_id, text).await;
    let task = state.store.create(draft)?;
    info!(%channel_id, task_id = %task.id(), "task created from chat");
    let assignee = task.meta.assignee.as_deref().unwrap_or("unassigned");
    Ok(format!("Created {}: {} ({}, {assignee})", task.id(), task.meta.title, task.meta.priority))
}

// ── Stand-up and triage ───────────────────────────────────────────────────────

/// Counts per status plus the in-progress, review and blocked lists.
pub fn standup(state: &AgentsState) -> String {
    let mut out = format!("Stand-up {}\n", Utc::now().format("%Y-%m-%d"));

    match state.store.counts() {
        Ok(counts) => {
            let line = TaskStatus::ALL
                .iter()
                .map(|s| format!("{} {}", s, counts.get(s).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
                .join(" | ");
            out.push_str(&line);
        }
        Err(e) => out.push_str(&format!("counts unavailable: {e}")),
    }

    for status in [TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Blocked] {
        match state.store.list(Some(status)) {
            Ok(tasks) if !tasks.is_empty() => {
                out.push_str(&format!("\n\n{status}:"));
                for t in &tasks {
                    out.push_str(&format!("\n  {}", t.summary_line()));
                }
            }
            Ok(_) => {}
            Err(e) => out.push_str(&format!("\n\n{status}: unavailable ({e})")),
        }
    }
    out
}

/// Triage every inbox task into the backlog. Returns one line per task.
pub async fn triage(state: &AgentsState, channel_id: &str) -> String {
    let inbox = match state.store.list(Some(TaskStatus::Inbox)) {
        Ok(tasks) => tasks,
        Err(e) => return format!("error: {e}"),
    };
    if inbox.is_empty() {
        return "inbox is empty".to_string();
    }

    let system = preamble(&state.prompts_dir, &state.bot_name)
        .layer_or("pm_triage.md", TRIAGE_FALLBACK)
        .var("roles", Role::names())
        .build();

    let mut lines = Vec::with_capacity(inbox.len());
    for task in inbox {
        match triage_one(state, channel_id, &task, &system).await {
            Ok(line) => lines.push(line),
            Err(e) => {
                warn!(task_id = %task.id(), error = %e, "triage failed");
                lines.push(format!("{}: error: {e}", task.id()));
            }
        }
    }
    format!("Triaged {} task(s):\n{}", lines.len(), lines.join("\n"))
}

async fn triage_one(state: &AgentsState, channel_id: &str, task: &Task, system: &str) -> Result<String, AppError> {
    let content = format!("{}\n\n{}", task.meta.title, task.body.trim());
    let reply = match state.complete(channel_id, content, Some(system.to_string())).await {
        Ok(text) => extract_json(&text)
            .and_then(|j| serde_json::from_str::<TriageReply>(j).ok())
            .unwrap_or_default(),
        Err(e) => {
            warn!(task_id = %task.id(), error = %e, "llm triage failed, keeping current fields");
            TriageReply::default()
        }
    };

    let patch = TaskPatch {
        priority: reply.priority.as_deref().and_then(Priority::parse),
        assignee: normalise_assignee(reply.assignee).filter(|_| task.meta.assignee.is_none()).map(Some),
        ..Default::default()
    };
    state.store.update(task.id(), patch)?;
    let moved = state.store.transition(task.id(), TaskStatus::Backlog)?;

    let assignee = moved.meta.assignee.as_deref().unwrap_or("unassigned");
    Ok(format!("{} -> backlog ({}, {assignee})", moved.id(), moved.meta.priority))
}

// ── Notifications ─────────────────────────────────────────────────────────────

pub fn scheduled_standup(state: &AgentsState) {
    if !state.flags.is_enabled(flags::STANDUP) {
        debug!("stand-up skipped: flag off");
        return;
    }
    info!("posting scheduled stand-up");
    state.notify(standup(state));
}

pub async fn scheduled_triage(state: &AgentsState) {
    if !state.flags.is_enabled(flags::AUTO_TRIAGE) {
        debug!("triage skipped: flag off");
        return;
    }
    match state.store.list(Some(TaskStatus::Inbox)) {
        Ok(tasks) if tasks.is_empty() => debug!("triage skipped: inbox empty"),
        Ok(_) => {
            let summary = triage(state, "cron").await;
            state.notify(summary);
        }
        Err(e) => warn!(error = %e, "triage skipped: inbox unreadable"),
    }
}

/// Relay a settled change from the watcher. Edits in place are not relayed.
pub fn task_changed(state: &AgentsState, task_id: Option<String>, status: Option<String>, kind: TaskEventKind) {
    if !state.flags.is_enabled(flags::NOTIFY_CHANGES) {
        return;
    }
    let Some(text) = change_message(state, task_id, status, kind) else {
        return;
    };
    state.notify(text);
}

fn change_message(
    state: &AgentsState,
    task_id: Option<String>,
    status: Option<String>,
    kind: TaskEventKind,
) -> Option<String> {
    let id = task_id?;
    let status = status.as_deref().and_then(TaskStatus::parse);
    match kind {
        TaskEventKind::Modified => None,
        TaskEventKind::Removed => Some(format!("{id} was removed{}", status.map(|s| format!(" from {s}")).unwrap_or_default())),
        TaskEventKind::Created => {
            let title = state.store.get(&id).map(|t| t.meta.title).unwrap_or_default();
            Some(match status {
                Some(TaskStatus::Inbox) | None => format!("New task {id}: {title}"),
                Some(s) => format!("{id} is now {s}: {title}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::LlmProvider;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::services::{FeatureFlags, GitRepo, Permissions, TestRunner};
    use crate::subsystems::agents::AgentsSubsystem;
    use crate::subsystems::comms::NotifySubsystem;
    use crate::subsystems::llm::LlmSubsystem;
    use crate::subsystems::tools::ToolsSubsystem;
    use crate::supervisor::bus::SupervisorBus;
    use crate::supervisor::control::SupervisorControl;
    use crate::supervisor::dispatch::BusHandler;
    use crate::supervisor::health::HealthRegistry;
    use crate::tasks::TaskStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        _dir: TempDir,
        state: Arc<AgentsState>,
        notes: broadcast::Receiver<String>,
        shutdown: CancellationToken,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = Config::test_default(dir.path());
        let store = Arc::new(TaskStore::open(&config.tasks.root, true).unwrap());
        let permissions = Arc::new(Permissions::new(&HashMap::new()));
        let flags = Arc::new(FeatureFlags::new(&HashMap::new()));

        let bus = SupervisorBus::new(64);
        let handle = bus.handle.clone();
        let (outbound, notes) = broadcast::channel(16);

        let agents = AgentsSubsystem::new(
            &config.agents,
            AgentsState::new(
                handle.clone(),
                store,
                permissions.clone(),
                flags.clone(),
                HealthRegistry::new(),
                config.agents.prompts_dir.clone(),
                "pm-bot",
            ),
        );
        let state = agents.state();
        let tools = ToolsSubsystem::new(
            GitRepo::new(dir.path(), "origin", "main"),
            TestRunner::new("true", dir.path(), 5, 5),
            permissions,
            flags,
        );
        let handlers: Vec<Box<dyn BusHandler>> = vec![
            Box::new(agents),
            Box::new(LlmSubsystem::with_provider(LlmProvider::Dummy(DummyProvider))),
            Box::new(tools),
            Box::new(NotifySubsystem::new(outbound)),
        ];
        let shutdown = CancellationToken::new();
        tokio::spawn(crate::supervisor::run(bus, SupervisorControl::new(4), shutdown.clone(), handlers));
        Harness { _dir: dir, state, notes, shutdown }
    }

    async fn say(h: &Harness, text: &str) -> String {
        handle_message(&h.state, "pty0", text).await
    }

    #[test]
    fn draft_json_is_extracted_from_prose() {
        let reply = "Sure!\n```json\n{\"title\": \"Add login\", \"description\": \"OAuth\", \
                     \"priority\": \"HIGH\", \"assignee\": \"Backend\", \"tags\": [\" Auth \"]}\n```";
        let draft = parse_draft(reply).unwrap();
        assert_eq!(draft.title, "Add login");
        assert_eq!(draft.priority, Some(Priority::High));
        assert_eq!(draft.assignee.as_deref(), Some("backend"));
        assert_eq!(draft.tags, vec!["auth"]);

        assert!(parse_draft("[echo] add login").is_none());
        assert!(parse_draft("{\"title\": \"  \"}").is_none());
    }

    #[test]
    fn fallback_uses_first_line() {
        let draft = fallback_draft("\n  Fix the flaky test  \nIt fails on CI twice a week.");
        assert_eq!(draft.title, "Fix the flaky test");
        assert!(draft.body.contains("twice a week"));
        assert_eq!(truncate(&"x".repeat(100), 10), "xxxxxxx...");
    }

    #[tokio::test]
    async fn free_text_creates_task_with_first_line_title() {
        let h = harness();
        let reply = say(&h, "Add rate limiting\nto the public API").await;
        assert_eq!(reply, "Created TASK-0001: Add rate limiting (medium, unassigned)");

        let task = h.state.store.get("1").unwrap();
        assert_eq!(task.status(), TaskStatus::Inbox);
        assert!(task.body.contains("public API"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn archive_rejects_out_of_range_ages() {
        let h = harness();
        say(&h, "/new Ship it").await;
        for to in ["backlog", "in-progress", "review", "completed"] {
            say(&h, &format!("/move 1 {to}")).await;
        }
        assert_eq!(h.state.store.get("1").unwrap().status(), TaskStatus::Completed);

        for age in ["1000000000", "-1", "36501", "9223372036854775807"] {
            let reply = say(&h, &format!("/archive {age}")).await;
            assert!(reply.starts_with("error:"), "{age}: {reply}");
        }
        assert_eq!(h.state.store.get("1").unwrap().status(), TaskStatus::Completed);

        assert_eq!(say(&h, "/archive 0").await, "archived TASK-0001");
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn non_ascii_task_ids_are_an_error_reply() {
        let h = harness();
        say(&h, "/new Unicode safety").await;
        assert!(say(&h, "/show abcdé").await.starts_with("error:"));
        assert!(say(&h, "/move tâsk backlog").await.starts_with("error:"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn commands_drive_the_lifecycle() {
        let h = harness();
        say(&h, "/new Write the README").await;

        assert_eq!(say(&h, "/move 1 in-progress").await, "error: task error: cannot move TASK-0001 from inbox to in-progress");
        assert_eq!(say(&h, "/move 1 backlog").await, "TASK-0001 moved to backlog");
        assert_eq!(say(&h, "/assign 1 QA").await, "TASK-0001 assigned to qa");
        assert_eq!(say(&h, "/priority 1 p0").await, "TASK-0001 priority set to critical");
        assert_eq!(say(&h, "/note 1 mention the config file").await, "note added to TASK-0001");

        let shown = say(&h, "/show TASK-0001").await;
        assert!(shown.starts_with("TASK-0001 [backlog] Write the README (critical, qa)"));
        assert!(shown.contains("mention the config file"));

        assert!(say(&h, "/list backlog").await.contains("TASK-0001"));
        assert_eq!(say(&h, "/list review").await, "no tasks");
        assert!(say(&h, "/list someday").await.starts_with("error:"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn triage_moves_inbox_to_backlog() {
        let h = harness();
        say(&h, "/new One").await;
        say(&h, "/new Two").await;

        let summary = say(&h, "/triage").await;
        assert!(summary.starts_with("Triaged 2 task(s):"));
        assert!(h.state.store.list(Some(TaskStatus::Inbox)).unwrap().is_empty());
        assert_eq!(h.state.store.list(Some(TaskStatus::Backlog)).unwrap().len(), 2);
        assert_eq!(say(&h, "/triage").await, "inbox is empty");
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn standup_lists_active_work() {
        let h = harness();
        say(&h, "/new Ship it").await;
        say(&h, "/move 1 backlog").await;
        say(&h, "/move 1 in-progress").await;

        let digest = say(&h, "/standup").await;
        assert!(digest.contains("in-progress 1"));
        assert!(digest.contains("in-progress:\n  TASK-0001"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn specialist_notes_are_appended() {
        let h = harness();
        say(&h, "/new Design the cache").await;

        let reply = say(&h, "/ask architect 1").await;
        assert!(reply.starts_with("architect notes on TASK-0001:"));
        let task = h.state.store.get("1").unwrap();
        assert!(task.body.contains("## Notes (architect)"));

        assert!(say(&h, "/ask janitor 1").await.starts_with("error:"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn flags_permissions_and_tests() {
        let h = harness();
        assert!(say(&h, "/flags").await.contains("git_automation: off"));
        assert_eq!(say(&h, "/flag standup off").await, "standup is now off");
        assert!(!h.state.flags.is_enabled(flags::STANDUP));
        assert!(say(&h, "/flag standup maybe").await.starts_with("error:"));

        assert!(say(&h, "/can janitor write src/main.rs").await.starts_with("no:"));
        assert!(say(&h, "/test").await.starts_with("tests passed"));
        assert!(say(&h, "/frobnicate").await.contains("/help"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn scheduled_jobs_respect_flags() {
        let mut h = harness();
        say(&h, "/new Inbox item").await;

        scheduled_standup(&h.state);
        let digest = tokio::time::timeout(std::time::Duration::from_secs(2), h.notes.recv()).await.unwrap().unwrap();
        assert!(digest.starts_with("Stand-up"));

        h.state.flags.set(flags::AUTO_TRIAGE, false);
        scheduled_triage(&h.state).await;
        assert_eq!(h.state.store.list(Some(TaskStatus::Inbox)).unwrap().len(), 1);

        h.state.flags.set(flags::AUTO_TRIAGE, true);
        scheduled_triage(&h.state).await;
        let summary = tokio::time::timeout(std::time::Duration::from_secs(2), h.notes.recv()).await.unwrap().unwrap();
        assert!(summary.starts_with("Triaged 1"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn task_changes_are_relayed() {
        let mut h = harness();
        say(&h, "/new Watch me").await;

        task_changed(&h.state, Some("TASK-0001".into()), Some("inbox".into()), TaskEventKind::Created);
        let note = tokio::time::timeout(std::time::Duration::from_secs(2), h.notes.recv()).await.unwrap().unwrap();
        assert_eq!(note, "New task TASK-0001: Watch me");

        assert!(change_message(&h.state, Some("TASK-0001".into()), Some("inbox".into()), TaskEventKind::Modified).is_none());
        assert_eq!(
            change_message(&h.state, Some("TASK-0001".into()), Some("review".into()), TaskEventKind::Created).unwrap(),
            "TASK-0001 is now review: Watch me"
        );
        h.shutdown.cancel();
    }
}
