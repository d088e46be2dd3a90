//! End-to-end tests for the filesystem task queue and the watcher's change
//! detection, using only the public API.

use std::collections::BTreeSet;
use std::fs;

use chrono::Duration;
use tempfile::TempDir;

use pmteam_bot::subsystems::watcher::Settler;
use pmteam_bot::supervisor::bus::TaskEventKind;
use pmteam_bot::tasks::{Priority, TaskDraft, TaskPatch, TaskStatus, TaskStore};

fn open() -> (TempDir, TaskStore) {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(dir.path().join("tasks"), true).unwrap();
    (dir, store)
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft { title: title.to_string(), ..TaskDraft::default() }
}

#[test]
fn test_status_directories_are_created() {
    let (_dir, store) = open();
    for status in TaskStatus::ALL {
        assert!(store.root().join(status.dir_name()).is_dir(), "{status} dir missing");
    }
}

#[test]
fn test_full_lifecycle_moves_the_file() {
    let (_dir, store) = open();
    let task = store
        .create(TaskDraft {
            title: "Add login endpoint".into(),
            body: "POST /login with email and password".into(),
            priority: Some(Priority::High),
            assignee: Some("backend".into()),
            tags: vec!["auth".into()],
            depends_on: vec![],
        })
        .unwrap();
    assert_eq!(task.id(), "TASK-0001");
    assert!(task.path.starts_with(store.root().join("inbox")));

    for to in [TaskStatus::Backlog, TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Completed] {
        let moved = store.transition("TASK-0001", to).unwrap();
        assert_eq!(moved.status(), to);
        assert!(moved.path.starts_with(store.root().join(to.dir_name())));
    }

    let on_disk = store.get("1").unwrap();
    assert_eq!(on_disk.status(), TaskStatus::Completed);
    assert_eq!(on_disk.meta.priority, Priority::High);
    assert_eq!(on_disk.meta.assignee.as_deref(), Some("backend"));
    assert!(on_disk.body.contains("POST /login"));

    let raw = fs::read_to_string(&on_disk.path).unwrap();
    assert!(raw.starts_with("---\n"));
    assert!(raw.contains("status: completed"));
}

#[test]
fn test_dependencies_gate_in_progress() {
    let (_dir, store) = open();
    store.create(draft("Schema")).unwrap();
    store
        .create(TaskDraft { title: "Migrations".into(), depends_on: vec!["1".into()], ..TaskDraft::default() })
        .unwrap();

    store.transition("2", TaskStatus::Backlog).unwrap();
    let err = store.transition("2", TaskStatus::InProgress).unwrap_err();
    assert!(err.to_string().contains("TASK-0001"));

    for to in [TaskStatus::Backlog, TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Completed] {
        store.transition("1", to).unwrap();
    }
    store.transition("2", TaskStatus::InProgress).unwrap();
}

#[test]
fn test_unknown_dependency_blocks_in_progress() {
    let (_dir, store) = open();
    store
        .create(TaskDraft { title: "Depends on a ghost".into(), depends_on: vec!["TASK-0042".into()], ..TaskDraft::default() })
        .unwrap();
    store.transition("1", TaskStatus::Backlog).unwrap();

    let err = store.transition("1", TaskStatus::InProgress).unwrap_err();
    assert!(err.to_string().contains("TASK-0042"), "{err}");
    assert_eq!(store.get("1").unwrap().status(), TaskStatus::Backlog);
}

#[test]
fn test_illegal_moves_leave_the_task_in_place() {
    let (_dir, store) = open();
    let task = store.create(draft("Stay put")).unwrap();
    assert!(store.transition("1", TaskStatus::Completed).is_err());
    assert!(store.transition("1", TaskStatus::Inbox).is_err());
    assert!(task.path.exists());
    assert_eq!(store.get("1").unwrap().status(), TaskStatus::Inbox);
}

#[test]
fn test_updates_notes_and_counts() {
    let (_dir, store) = open();
    store.create(draft("One")).unwrap();
    store.create(draft("Two")).unwrap();
    store.transition("2", TaskStatus::Backlog).unwrap();

    store
        .update(
            "1",
            TaskPatch { tags: Some(vec!["docs".into()]), note: Some("check the wiki".into()), ..TaskPatch::default() },
        )
        .unwrap();
    store.append_section("1", "Notes (qa)", "- add a smoke test").unwrap();

    let one = store.get("1").unwrap();
    assert_eq!(one.meta.tags, vec!["docs"]);
    assert!(one.body.contains("check the wiki"));
    assert!(one.body.contains("## Notes (qa)"));

    let counts = store.counts().unwrap();
    assert_eq!(counts.get(&TaskStatus::Inbox), Some(&1));
    assert_eq!(counts.get(&TaskStatus::Backlog), Some(&1));
    assert_eq!(store.list(None).unwrap().len(), 2);
}

#[test]
fn test_archive_only_takes_stale_completed_tasks() {
    let (_dir, store) = open();
    store.create(draft("Done")).unwrap();
    for to in [TaskStatus::Backlog, TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Completed] {
        store.transition("1", to).unwrap();
    }

    assert!(store.archive_completed(Duration::days(7)).unwrap().is_empty());
    assert_eq!(store.archive_completed(Duration::zero()).unwrap(), vec!["TASK-0001"]);
    assert_eq!(store.get("1").unwrap().status(), TaskStatus::Archive);
}

#[test]
fn test_settler_reports_moves_once() {
    let (_dir, store) = open();
    let task = store.create(draft("Watch me")).unwrap();
    let mut settler = Settler::new(store.root());

    let before = task.path.clone();
    let moved = store.transition("1", TaskStatus::Backlog).unwrap();
    let changes = settler.settle(BTreeSet::from([before, moved.path.clone()]));

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].task_id, "TASK-0001");
    assert_eq!(changes[0].status, Some(TaskStatus::Backlog));
    assert_eq!(changes[0].kind, TaskEventKind::Created);

    // Touching without changing content is quiet.
    assert!(settler.settle(BTreeSet::from([moved.path])).is_empty());
}
