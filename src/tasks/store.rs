//! Task store — directory-per-status bookkeeping over markdown task files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::TaskError;
use super::frontmatter;
use super::model::{Task, TaskDraft, TaskMeta, TaskPatch, TaskStatus};

const ID_PREFIX: &str = "TASK-";
const SLUG_MAX: usize = 48;

/// Task store rooted at a directory containing one sub-directory per status.
///
/// Mutating calls are serialised through an internal lock so two chat
/// messages racing on the same task cannot interleave rename and rewrite.
/// Share it behind an `Arc`.
pub struct TaskStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl TaskStore {
    /// Open the store, creating missing status directories when `create_dirs`.
    pub fn open(root: impl Into<PathBuf>, create_dirs: bool) -> Result<Self, TaskError> {
        let root = root.into();
        for status in TaskStatus::ALL {
            let dir = root.join(status.dir_name());
            if !dir.is_dir() {
                if create_dirs {
                    fs::create_dir_all(&dir)?;
                } else {
                    warn!(dir = %dir.display(), "task status directory missing");
                }
            }
        }
        debug!(root = %root.display(), "task store opened");
        Ok(Self { root, write_lock: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status_dir(&self, status: TaskStatus) -> PathBuf {
        self.root.join(status.dir_name())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Load a task by id (`TASK-0007`, `task-7` and `7` are all accepted).
    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        let id = normalize_id(id)?;
        let (path, status) = self
            .find_path(&id)?
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        load_task(&path, status)
    }

    /// List tasks, optionally restricted to one status. Sorted by priority
    /// (highest first) then id. Unparsable files are skipped with a warning.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskError> {
        let statuses: Vec<TaskStatus> = match status {
            Some(s) => vec![s],
            None => TaskStatus::ALL.to_vec(),
        };

        let mut tasks = Vec::new();
        for s in statuses {
            for path in self.task_files(s)? {
                match load_task(&path, s) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable task file"),
                }
            }
        }

        tasks.sort_by(|a, b| {
            b.meta
                .priority
                .cmp(&a.meta.priority)
                .then_with(|| a.meta.id.cmp(&b.meta.id))
        });
        Ok(tasks)
    }

    /// Number of task files per status (every status present, possibly 0).
    pub fn counts(&self) -> Result<BTreeMap<TaskStatus, usize>, TaskError> {
        let mut counts = BTreeMap::new();
        for status in TaskStatus::ALL {
            counts.insert(status, self.task_files(status)?.len());
        }
        Ok(counts)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Create a new task in `inbox` and return it.
    pub fn create(&self, draft: TaskDraft) -> Result<Task, TaskError> {
        let _guard = self.lock();

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(TaskError::Parse {
                path: "<draft>".to_string(),
                message: "task title must not be empty".to_string(),
            });
        }

        let id = self.next_id()?;
        let now = Utc::now();
        let meta = TaskMeta {
            id: id.clone(),
            title: title.to_string(),
            status: TaskStatus::Inbox,
            priority: draft.priority.unwrap_or_default(),
            assignee: draft.assignee.filter(|a| !a.trim().is_empty()),
            created: now,
            updated: now,
            tags: draft.tags,
            depends_on: draft
                .depends_on
                .iter()
                .filter_map(|d| normalize_id(d).ok())
                .collect(),
            extra: BTreeMap::new(),
        };

        let path = self
            .status_dir(TaskStatus::Inbox)
            .join(format!("{id}-{}.md", slugify(title)));
        let content = frontmatter::render(&meta, &draft.body)?;
        atomic_write(&path, content.as_bytes())?;

        info!(task_id = %id, path = %path.display(), "task created");
        Ok(Task { meta, body: draft.body.trim().to_string(), path })
    }

    /// Move a task to `to`, enforcing the lifecycle edges and, when entering
    /// `in-progress`, that every dependency is done.
    pub fn transition(&self, id: &str, to: TaskStatus) -> Result<Task, TaskError> {
        let _guard = self.lock();

        let id = normalize_id(id)?;
        let (path, from) = self
            .find_path(&id)?
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;

        if !from.can_transition_to(to) {
            return Err(TaskError::InvalidTransition { id, from, to });
        }

        let mut task = load_task(&path, from)?;

        if to == TaskStatus::InProgress {
            let pending = self.pending_dependencies(&task.meta.depends_on)?;
            if !pending.is_empty() {
                return Err(TaskError::BlockedByDependencies { id, pending });
            }
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| TaskError::InvalidId(id.clone()))?;
        let dest = self.status_dir(to).join(file_name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Rename first: a crash before the rewrite leaves the directory (the
        // source of truth) correct and only the front matter stale.
        fs::rename(&path, &dest)?;

        task.meta.status = to;
        task.meta.updated = Utc::now();
        task.path = dest;
        let content = frontmatter::render(&task.meta, &task.body)?;
        atomic_write(&task.path, content.as_bytes())?;

        info!(task_id = %task.meta.id, %from, %to, "task moved");
        Ok(task)
    }

    /// Apply a partial update in place.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, TaskError> {
        let _guard = self.lock();

        let id = normalize_id(id)?;
        let (path, status) = self
            .find_path(&id)?
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let mut task = load_task(&path, status)?;

        if let Some(title) = patch.title {
            let title = title.trim();
            if !title.is_empty() {
                task.meta.title = title.to_string();
            }
        }
        if let Some(priority) = patch.priority {
            task.meta.priority = priority;
        }
        if let Some(assignee) = patch.assignee {
            task.meta.assignee = assignee.filter(|a| !a.trim().is_empty());
        }
        if let Some(tags) = patch.tags {
            task.meta.tags = tags;
        }
        if let Some(depends_on) = patch.depends_on {
            task.meta.depends_on = depends_on
                .iter()
                .filter_map(|d| normalize_id(d).ok())
                .collect();
        }
        if let Some(note) = patch.note {
            task.body = append_note(&task.body, &note);
        }

        task.meta.updated = Utc::now();
        let content = frontmatter::render(&task.meta, &task.body)?;
        atomic_write(&task.path, content.as_bytes())?;

        debug!(task_id = %task.meta.id, "task updated");
        Ok(task)
    }

    /// Set (or clear, with `None`) the assignee.
    pub fn assign(&self, id: &str, assignee: Option<&str>) -> Result<Task, TaskError> {
        self.update(
            id,
            TaskPatch {
                assignee: Some(assignee.map(|a| a.trim().to_ascii_lowercase())),
                ..TaskPatch::default()
            },
        )
    }

    /// Append `text` under a `## {heading}` section at the end of the body.
    pub fn append_section(&self, id: &str, heading: &str, text: &str) -> Result<Task, TaskError> {
        let _guard = self.lock();

        let id = normalize_id(id)?;
        let (path, status) = self
            .find_path(&id)?
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let mut task = load_task(&path, status)?;

        let mut body = task.body.trim_end().to_string();
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&format!("## {heading}\n\n{}", text.trim()));
        task.body = body;
        task.meta.updated = Utc::now();

        let content = frontmatter::render(&task.meta, &task.body)?;
        atomic_write(&task.path, content.as_bytes())?;
        debug!(task_id = %task.meta.id, %heading, "section appended");
        Ok(task)
    }

    /// Move completed tasks not touched for `older_than` into the archive.
    /// Returns the ids that were moved.
    pub fn archive_completed(&self, older_than: Duration) -> Result<Vec<String>, TaskError> {
        if older_than < Duration::zero() {
            return Err(TaskError::InvalidAge(format!("{} days is negative", older_than.num_days())));
        }
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .ok_or_else(|| TaskError::InvalidAge(format!("{} days is out of range", older_than.num_days())))?;
        let stale: Vec<String> = self
            .list(Some(TaskStatus::Completed))?
            .into_iter()
            .filter(|t| t.meta.updated <= cutoff)
            .map(|t| t.meta.id)
            .collect();

        let mut moved = Vec::new();
        for id in stale {
            match self.transition(&id, TaskStatus::Archive) {
                Ok(_) => moved.push(id),
                Err(e) => warn!(task_id = %id, error = %e, "archive failed"),
            }
        }
        Ok(moved)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn task_files(&self, status: TaskStatus) -> Result<Vec<PathBuf>, TaskError> {
        let dir = self.status_dir(status);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && task_id_from_path(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn find_path(&self, id: &str) -> Result<Option<(PathBuf, TaskStatus)>, TaskError> {
        for status in TaskStatus::ALL {
            for path in self.task_files(status)? {
                if task_id_from_path(&path).as_deref() == Some(id) {
                    return Ok(Some((path, status)));
                }
            }
        }
        Ok(None)
    }

    fn next_id(&self) -> Result<String, TaskError> {
        let mut max = 0u32;
        for status in TaskStatus::ALL {
            for path in self.task_files(status)? {
                if let Some(n) = task_id_from_path(&path).and_then(|id| id_number(&id)) {
                    max = max.max(n);
                }
            }
        }
        Ok(format!("{ID_PREFIX}{:04}", max + 1))
    }

    fn pending_dependencies(&self, depends_on: &[String]) -> Result<Vec<String>, TaskError> {
        let mut pending = Vec::new();
        for dep in depends_on {
            match self.find_path(dep)? {
                Some((_, status)) if status.is_done() => {}
                _ => pending.push(dep.clone()),
            }
        }
        Ok(pending)
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

fn load_task(path: &Path, dir_status: TaskStatus) -> Result<Task, TaskError> {
    let content = fs::read_to_string(path)?;
    let label = path.display().to_string();
    let (mut meta, body) = frontmatter::parse(&label, &content)?;
    if meta.status != dir_status {
        debug!(
            task_id = %meta.id,
            front_matter = %meta.status,
            directory = %dir_status,
            "front matter status disagrees with directory — directory wins"
        );
        meta.status = dir_status;
    }
    Ok(Task { meta, body, path: path.to_path_buf() })
}

/// Canonicalise user input into `TASK-NNNN`.
pub fn normalize_id(input: &str) -> Result<String, TaskError> {
    let trimmed = input.trim().trim_start_matches('#');
    let has_prefix = trimmed
        .get(..ID_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(ID_PREFIX));
    let digits = match trimmed.get(ID_PREFIX.len()..) {
        Some(rest) if has_prefix => rest,
        _ => trimmed,
    };
    let n: u32 = digits
        .parse()
        .map_err(|_| TaskError::InvalidId(input.to_string()))?;
    if n == 0 {
        return Err(TaskError::InvalidId(input.to_string()));
    }
    Ok(format!("{ID_PREFIX}{n:04}"))
}

fn id_number(id: &str) -> Option<u32> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

/// Extract `TASK-NNNN` from a file name like `TASK-0007-some-slug.md`.
pub fn task_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    let rest = name.strip_prefix(ID_PREFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let n: u32 = digits.parse().ok()?;
    Some(format!("{ID_PREFIX}{n:04}"))
}

/// Derive a status from the task file's parent directory, if it is one of
/// the status directories directly under `root`.
pub fn status_from_path(root: &Path, path: &Path) -> Option<TaskStatus> {
    let parent = path.parent()?;
    if parent.parent()? != root {
        return None;
    }
    TaskStatus::parse(parent.file_name()?.to_str()?)
}

/// Lowercase, ascii-alphanumeric words joined with `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= SLUG_MAX {
            break;
        }
    }
    if slug.is_empty() { "task".to_string() } else { slug }
}

fn append_note(body: &str, note: &str) -> String {
    let note = note.trim();
    if note.is_empty() {
        return body.to_string();
    }
    let stamp = Utc::now().format("%Y-%m-%d %H:%M");
    let mut out = body.trim_end().to_string();
    if !out.lines().any(|l| l.trim() == "## Notes") {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("## Notes\n");
    }
    out.push_str(&format!("\n- {stamp}: {note}"));
    out
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), TaskError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
