//! Thin wrapper over the `git` and `gh` command-line tools.
//!
//! Every operation is a literal shell-out in the configured repository
//! directory. A non-zero exit becomes [`GitError::Failed`] carrying stderr;
//! there is no retry, locking or conflict handling.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::services::permissions::Permissions;
use crate::tasks::store::slugify;

const BRANCH_SLUG_MAX: usize = 32;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("{role} may not write {}", paths.join(", "))]
    PermissionDenied { role: String, paths: Vec<String> },

    #[error("nothing to commit")]
    NothingToCommit,
}

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChangedFile {
    /// Two-letter porcelain status code, e.g. `" M"` or `"??"`.
    pub code: String,
    pub path: String,
    /// Source path of a rename or copy (`R`/`C`).
    pub orig_path: Option<String>,
}

impl ChangedFile {
    /// Every path the change touches: the source of a rename as well as
    /// its destination.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.orig_path.as_deref().into_iter().chain(std::iter::once(self.path.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    remote: String,
    base_branch: String,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>, remote: impl Into<String>, base_branch: impl Into<String>) -> Self {
        Self { dir: dir.into(), remote: remote.into(), base_branch: base_branch.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Changed files in the working tree.
    pub async fn status(&self) -> Result<Vec<ChangedFile>, GitError> {
        let out = self.git(&["status", "--porcelain"]).await?;
        Ok(parse_porcelain(&out))
    }

    pub async fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?.trim().to_string())
    }

    /// Create and check out the working branch for a task.
    pub async fn create_task_branch(&self, task_id: &str, title: &str) -> Result<String, GitError> {
        let name = branch_name(task_id, title);
        self.git(&["checkout", "-b", &name]).await?;
        info!(branch = %name, "task branch created");
        Ok(name)
    }

    /// Stage everything and commit. When `role` is given, every changed path
    /// must be writable by that role, including both sides of a rename.
    pub async fn commit(
        &self,
        message: &str,
        role: Option<&str>,
        permissions: &Permissions,
    ) -> Result<String, GitError> {
        let changed = self.status().await?;
        if changed.is_empty() {
            return Err(GitError::NothingToCommit);
        }
        if let Some(role) = role {
            let denied: Vec<String> = changed
                .iter()
                .flat_map(ChangedFile::paths)
                .filter(|path| !permissions.check(role, "write", path))
                .map(str::to_string)
                .collect();
            if !denied.is_empty() {
                return Err(GitError::PermissionDenied { role: role.to_string(), paths: denied });
            }
        }

        self.git(&["add", "--all"]).await?;
        self.git(&["commit", "-m", message]).await?;
        let hash = self.git(&["rev-parse", "--short", "HEAD"]).await?.trim().to_string();
        info!(%hash, files = changed.len(), "committed");
        Ok(hash)
    }

    /// Push the current branch to the configured remote.
    pub async fn push(&self) -> Result<String, GitError> {
        let branch = self.current_branch().await?;
        self.git(&["push", "-u", &self.remote, &branch]).await?;
        info!(%branch, remote = %self.remote, "pushed");
        Ok(branch)
    }

    /// Open a pull request against the base branch with `gh`. Returns the
    /// URL printed by `gh`.
    pub async fn open_pr(&self, title: &str, body: &str) -> Result<String, GitError> {
        let out = run(
            "gh",
            &["pr", "create", "--title", title, "--body", body, "--base", &self.base_branch],
            &self.dir,
        )
        .await?;
        Ok(out.trim().to_string())
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        run("git", args, &self.dir).await
    }
}

async fn run(program: &str, args: &[&str], dir: &Path) -> Result<String, GitError> {
    debug!(program, ?args, dir = %dir.display(), "running");
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| GitError::Spawn { program: program.to_string(), source })?;

    if !output.status.success() {
        let command = format!("{program} {}", args.first().copied().unwrap_or_default());
        return Err(GitError::Failed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `task/<id-lower>-<slug>` with the slug shortened for readability.
pub fn branch_name(task_id: &str, title: &str) -> String {
    let mut slug = slugify(title);
    if slug.len() > BRANCH_SLUG_MAX {
        slug.truncate(BRANCH_SLUG_MAX);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    format!("task/{}-{slug}", task_id.to_ascii_lowercase())
}

pub fn parse_porcelain(out: &str) -> Vec<ChangedFile> {
    out.lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let (code, rest) = l.split_at(2);
            let rest = rest.trim_start();
            let unquote = |p: &str| p.trim_matches('"').to_string();
            // Renames and copies are reported as `old -> new`.
            match rest.split_once(" -> ") {
                Some((from, to)) if code.contains(['R', 'C']) => {
                    ChangedFile { code: code.to_string(), path: unquote(to), orig_path: Some(unquote(from)) }
                }
                _ => ChangedFile { code: code.to_string(), path: unquote(rest), orig_path: None },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn branch_name_is_lowercase_and_short() {
        assert_eq!(branch_name("TASK-0007", "Add login endpoint"), "task/task-0007-add-login-endpoint");
        let long = branch_name("TASK-0001", "a very long title that keeps going well past the limit");
        let slug = long.trim_start_matches("task/task-0001-");
        assert!(slug.len() <= BRANCH_SLUG_MAX);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn porcelain_parsing() {
        let out = " M src/lib.rs\n?? notes/new file.md\nR  old.rs -> src/new.rs\n";
        let files = parse_porcelain(out);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0], ChangedFile { code: " M".into(), path: "src/lib.rs".into(), orig_path: None });
        assert_eq!(files[1].path, "notes/new file.md");
        assert_eq!(files[2].path, "src/new.rs");
        assert_eq!(files[2].orig_path.as_deref(), Some("old.rs"));
        assert_eq!(files[2].paths().collect::<Vec<_>>(), vec!["old.rs", "src/new.rs"]);
    }

    async fn git_available() -> bool {
        Command::new("git").arg("--version").output().await.is_ok_and(|o| o.status.success())
    }

    async fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "bot@example.com"],
            vec!["config", "user.name", "bot"],
        ] {
            run("git", &args, dir).await.unwrap();
        }
    }

    #[tokio::test]
    async fn commit_respects_role_permissions() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path()).await;
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "// lib\n").unwrap();

        let repo = GitRepo::new(dir.path(), "origin", "main");
        let perms = Permissions::new(&HashMap::new());

        let status = repo.status().await.unwrap();
        assert_eq!(status.len(), 1);

        let err = repo.commit("docs only", Some("architect"), &perms).await.unwrap_err();
        assert!(matches!(err, GitError::PermissionDenied { .. }));

        let hash = repo.commit("add lib", Some("backend"), &perms).await.unwrap();
        assert!(!hash.is_empty());
        assert!(repo.status().await.unwrap().is_empty());
        assert!(matches!(
            repo.commit("again", None, &perms).await.unwrap_err(),
            GitError::NothingToCommit
        ));
    }

    #[tokio::test]
    async fn rename_checks_the_source_path_too() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path()).await;
        std::fs::create_dir_all(dir.path().join("ui")).unwrap();
        std::fs::write(dir.path().join("ui/app.tsx"), "export const App = () => null;\n").unwrap();

        let repo = GitRepo::new(dir.path(), "origin", "main");
        let perms = Permissions::new(&HashMap::new());
        repo.commit("add ui", None, &perms).await.unwrap();

        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        run("git", &["mv", "ui/app.tsx", "src/app.tsx"], dir.path()).await.unwrap();

        let status = repo.status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].orig_path.as_deref(), Some("ui/app.tsx"));

        match repo.commit("move ui into src", Some("backend"), &perms).await.unwrap_err() {
            GitError::PermissionDenied { role, paths } => {
                assert_eq!(role, "backend");
                assert_eq!(paths, vec!["ui/app.tsx"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dir.path().join("src/app.tsx").exists());
    }

    #[tokio::test]
    async fn failing_command_carries_stderr() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let repo = GitRepo::new(dir.path(), "origin", "main");
        match repo.status().await {
            Err(GitError::Failed { command, stderr }) => {
                assert_eq!(command, "git status");
                assert!(!stderr.is_empty());
            }
            other => panic!("expected failure outside a repository, got {other:?}"),
        }
    }
}
