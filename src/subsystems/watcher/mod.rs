//! Filesystem watcher over the task root.
//!
//! A `notify` watcher forwards raw events into a tokio channel. Bursts are
//! collapsed over the debounce window, then each settled task file is
//! fingerprinted with SHA-256 so saves that did not change the content stay
//! quiet. Every real change is emitted as an `agents/pm/task_changed`
//! notification.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};
use crate::supervisor::bus::{BusHandle, BusPayload, TaskEventKind};
use crate::supervisor::health::HealthReporter;
use crate::tasks::TaskStatus;
use crate::tasks::store::{status_from_path, task_id_from_path};

pub const TASK_CHANGED_METHOD: &str = "agents/pm/task_changed";

/// A settled change to one task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskChange {
    pub path: PathBuf,
    pub task_id: String,
    pub status: Option<TaskStatus>,
    pub kind: TaskEventKind,
}

impl TaskChange {
    pub fn into_payload(self) -> BusPayload {
        BusPayload::TaskEvent {
            path: self.path.display().to_string(),
            task_id: Some(self.task_id),
            status: self.status.map(|s| s.dir_name().to_string()),
            kind: self.kind,
        }
    }
}

/// Content fingerprints of every task file seen so far.
pub struct Settler {
    root: PathBuf,
    fingerprints: HashMap<PathBuf, String>,
}

impl Settler {
    /// Seed fingerprints from the files already on disk.
    pub fn new(root: &Path) -> Self {
        let mut fingerprints = HashMap::new();
        for status in TaskStatus::ALL {
            let Ok(entries) = std::fs::read_dir(root.join(status.dir_name())) else {
                continue;
            };
            for path in entries.flatten().map(|e| e.path()) {
                if task_id_from_path(&path).is_some() {
                    if let Some(fp) = fingerprint(&path) {
                        fingerprints.insert(path, fp);
                    }
                }
            }
        }
        debug!(known = fingerprints.len(), "watcher seeded");
        Self { root: root.to_path_buf(), fingerprints }
    }

    /// Turn a batch of touched paths into real changes.
    ///
    /// A task removed from one status directory and created in another in the
    /// same batch is a move; only the arrival is reported.
    pub fn settle(&mut self, paths: BTreeSet<PathBuf>) -> Vec<TaskChange> {
        let mut changes = Vec::new();
        for path in paths {
            let Some(task_id) = task_id_from_path(&path) else {
                continue;
            };
            let status = status_from_path(&self.root, &path);
            if status.is_none() {
                continue;
            }
            match fingerprint(&path) {
                Some(fp) => {
                    let kind = match self.fingerprints.insert(path.clone(), fp.clone()) {
                        Some(previous) if previous == fp => continue,
                        Some(_) => TaskEventKind::Modified,
                        None => TaskEventKind::Created,
                    };
                    changes.push(TaskChange { path, task_id, status, kind });
                }
                None => {
                    if self.fingerprints.remove(&path).is_some() {
                        changes.push(TaskChange { path, task_id, status, kind: TaskEventKind::Removed });
                    }
                }
            }
        }

        let arrived: HashSet<String> = changes
            .iter()
            .filter(|c| c.kind == TaskEventKind::Created)
            .map(|c| c.task_id.clone())
            .collect();
        changes.retain(|c| c.kind != TaskEventKind::Removed || !arrived.contains(&c.task_id));
        changes
    }
}

fn fingerprint(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}

fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// Watcher component; runs until shutdown.
pub struct TaskWatcher {
    root: PathBuf,
    debounce: Duration,
    bus: BusHandle,
    reporter: Option<HealthReporter>,
}

impl TaskWatcher {
    pub fn new(root: impl Into<PathBuf>, debounce_ms: u64, bus: BusHandle) -> Self {
        Self { root: root.into(), debounce: Duration::from_millis(debounce_ms), bus, reporter: None }
    }

    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    async fn run_loop(self, shutdown: CancellationToken) -> Result<(), AppError> {
        // Events arrive with paths under the watched path; canonicalise so
        // they line up with the status directories.
        let root = std::fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event) => {
                let _ = tx.send(event);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "watch error"),
        })
        .map_err(|e| AppError::Watcher(format!("cannot create watcher: {e}")))?;

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            let message = format!("cannot watch {}: {e}", root.display());
            if let Some(r) = &self.reporter {
                r.set_unhealthy(message.clone()).await;
            }
            return Err(AppError::Watcher(message));
        }

        let mut settler = Settler::new(&root);
        if let Some(r) = &self.reporter {
            r.set_healthy_with(format!("watching {}", root.display()), None).await;
        }
        info!(root = %root.display(), debounce_ms = self.debounce.as_millis() as u64, "task watcher running");

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };

            let mut pending: BTreeSet<PathBuf> = first.paths.into_iter().collect();
            while let Ok(Some(ev)) = tokio::time::timeout(self.debounce, rx.recv()).await {
                pending.extend(ev.paths);
            }

            for change in settler.settle(pending) {
                debug!(task_id = %change.task_id, kind = ?change.kind, status = ?change.status, "task file changed");
                if let Err(e) = self.bus.notify(TASK_CHANGED_METHOD, change.into_payload()) {
                    warn!(error = %e, "task change notification dropped");
                }
            }
        }

        info!("task watcher stopped");
        Ok(())
    }
}

impl Component for TaskWatcher {
    fn id(&self) -> &str {
        "watcher"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskDraft, TaskStore};
    use tempfile::TempDir;

    fn setup() -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::open(dir.path(), true).unwrap();
        (dir, store)
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft { title: title.into(), ..TaskDraft::default() }
    }

    #[test]
    fn create_modify_and_noop() {
        let (dir, store) = setup();
        let mut settler = Settler::new(dir.path());

        let task = store.create(draft("Write docs")).unwrap();
        let changes = settler.settle(BTreeSet::from([task.path.clone()]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, TaskEventKind::Created);
        assert_eq!(changes[0].status, Some(TaskStatus::Inbox));

        // Same content again: nothing to report.
        assert!(settler.settle(BTreeSet::from([task.path.clone()])).is_empty());

        store.assign("1", Some("qa")).unwrap();
        let changes = settler.settle(BTreeSet::from([task.path.clone()]));
        assert_eq!(changes[0].kind, TaskEventKind::Modified);
    }

    #[test]
    fn move_reports_arrival_only() {
        let (dir, store) = setup();
        let task = store.create(draft("Ship it")).unwrap();
        let mut settler = Settler::new(dir.path());

        let moved = store.transition("1", TaskStatus::Backlog).unwrap();
        let changes = settler.settle(BTreeSet::from([task.path.clone(), moved.path.clone()]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].task_id, "TASK-0001");
        assert_eq!(changes[0].status, Some(TaskStatus::Backlog));
        assert_eq!(changes[0].kind, TaskEventKind::Created);
    }

    #[test]
    fn deletion_and_ignored_files() {
        let (dir, store) = setup();
        let task = store.create(draft("Temp")).unwrap();
        let mut settler = Settler::new(dir.path());

        std::fs::remove_file(&task.path).unwrap();
        let stray = dir.path().join("inbox/.tmp123");
        std::fs::write(&stray, "x").unwrap();
        let outside = dir.path().join("TASK-0009-root.md");
        std::fs::write(&outside, "x").unwrap();

        let changes = settler.settle(BTreeSet::from([task.path.clone(), stray, outside]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, TaskEventKind::Removed);
    }

    #[test]
    fn payload_carries_status_dir_name() {
        let change = TaskChange {
            path: PathBuf::from("/t/in-progress/TASK-0002-x.md"),
            task_id: "TASK-0002".into(),
            status: Some(TaskStatus::InProgress),
            kind: TaskEventKind::Created,
        };
        match change.into_payload() {
            BusPayload::TaskEvent { status, task_id, .. } => {
                assert_eq!(status.as_deref(), Some("in-progress"));
                assert_eq!(task_id.as_deref(), Some("TASK-0002"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
