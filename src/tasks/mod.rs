//! Filesystem task queue.
//!
//! Each task is a markdown file with YAML front matter living in one of the
//! status directories under the task root:
//!
//! ```text
//! <root>/inbox/        TASK-0001-add-login-endpoint.md
//! <root>/backlog/
//! <root>/in-progress/
//! <root>/review/
//! <root>/blocked/
//! <root>/completed/
//! <root>/archive/
//! ```
//!
//! Moving a task between statuses is a rename between directories followed by
//! a front matter rewrite. The directory is authoritative for status.

pub mod frontmatter;
pub mod model;
pub mod store;

pub use model::{Priority, Task, TaskDraft, TaskMeta, TaskPatch, TaskStatus};
pub use store::TaskStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid task id: {0}")]
    InvalidId(String),

    #[error("cannot move {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{id} is waiting on unfinished dependencies: {}", pending.join(", "))]
    BlockedByDependencies { id: String, pending: Vec<String> },

    #[error("invalid archive age: {0}")]
    InvalidAge(String),

    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
