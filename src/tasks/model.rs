//! Task record types and the status lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── TaskStatus ────────────────────────────────────────────────────────────────

/// Lifecycle status of a task. Each status owns one directory under the task
/// root; the directory a file sits in is its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Inbox,
    Backlog,
    InProgress,
    Review,
    Blocked,
    Completed,
    Archive,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Inbox,
        TaskStatus::Backlog,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Archive,
    ];

    /// Directory name under the task root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TaskStatus::Inbox => "inbox",
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Archive => "archive",
        }
    }

    /// Lenient parse used for chat commands and directory names.
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbox" => Some(TaskStatus::Inbox),
            "backlog" => Some(TaskStatus::Backlog),
            "in-progress" | "in_progress" | "inprogress" | "wip" => Some(TaskStatus::InProgress),
            "review" => Some(TaskStatus::Review),
            "blocked" => Some(TaskStatus::Blocked),
            "completed" | "done" => Some(TaskStatus::Completed),
            "archive" | "archived" => Some(TaskStatus::Archive),
            _ => None,
        }
    }

    /// `true` once the work is finished (completed or archived).
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Archive)
    }

    /// Whether a task in `self` may move to `to`.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (a, b) if *a == b => false,
            (Inbox, Backlog | Archive) => true,
            (Backlog, InProgress | Blocked | Archive) => true,
            (InProgress, Review | Blocked | Backlog) => true,
            (Review, Completed | InProgress | Blocked) => true,
            (Blocked, Backlog | InProgress) => true,
            (Completed, Archive | InProgress) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

// ── Priority ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "p3" => Some(Priority::Low),
            "medium" | "normal" | "p2" => Some(Priority::Medium),
            "high" | "p1" => Some(Priority::High),
            "critical" | "urgent" | "p0" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TaskMeta ──────────────────────────────────────────────────────────────────

/// YAML front matter of a task file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Hand-written keys we do not model; kept so they survive a rewrite.
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A task file loaded from disk.
#[derive(Debug, Clone)]
pub struct Task {
    pub meta: TaskMeta,
    pub body: String,
    pub path: PathBuf,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn status(&self) -> TaskStatus {
        self.meta.status
    }

    /// One-line summary used in chat listings.
    pub fn summary_line(&self) -> String {
        let assignee = self.meta.assignee.as_deref().unwrap_or("unassigned");
        format!(
            "{} [{}] {} ({}, {})",
            self.meta.id, self.meta.status, self.meta.title, self.meta.priority, assignee
        )
    }
}

/// Input for creating a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default, alias = "description")]
    pub body: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Partial update applied by [`crate::tasks::TaskStore::update`].
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the assignee.
    pub assignee: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub depends_on: Option<Vec<String>>,
    /// Appended to the body under a `## Notes` heading.
    pub note: Option<String>,
}
