//! Synchronization of the watched directory with its git remote.
//!
//! Index and commit work goes through libgit2; pull and push shell out to the
//! `git` client so the user's remotes and credential helpers apply. Every sync
//! failure is reported as a warning and never blocks processing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use git2::build::TreeUpdateBuilder;
use git2::{Commit, FileMode, ObjectType, Oid, Repository, Signature};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::retry::RetryPolicy;

/// Remote revision-control operations used by the pipeline.
pub trait VersionControl {
    /// Fetches and integrates remote changes into the watched directory.
    async fn pull(&self) -> Result<(), SyncError>;

    /// Removes a processed file from revision control and publishes the removal.
    async fn remove_and_push(&self, file: &Path, sr_number: &str) -> Result<(), SyncError>;
}

/// Git-backed [`VersionControl`] rooted at the watched directory.
#[derive(Debug, Clone)]
pub struct GitSync {
    dir: PathBuf,
}

impl GitSync {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    // `None` when the directory is not inside a work tree.
    fn open(&self) -> Option<Repository> {
        Repository::discover(&self.dir)
            .ok()
            .filter(|repo| !repo.is_bare())
    }

    pub fn is_under_version_control(&self) -> bool {
        self.open().is_some()
    }

    /// Commits the removal of `file` from revision control, keeping the
    /// working copy.
    ///
    /// Untracked files are added and committed first. Only this path changes
    /// in either commit; anything else staged in the index is left alone.
    /// Calling this again for the same content after the removal commit
    /// landed is a no-op. Returns `false` when the directory is not under
    /// revision control.
    pub fn commit_removal(&self, file: &Path, sr_number: &str) -> Result<bool, SyncError> {
        let Some(repo) = self.open() else {
            return Ok(false);
        };
        let rel = repo_relative(&repo, file)?;
        let removal_message = format!("Processed SR {sr_number}");

        let head_tree = repo.head().ok().and_then(|head| head.peel_to_tree().ok());
        let in_head = head_tree
            .as_ref()
            .is_some_and(|tree| tree.get_path(&rel).is_ok());

        let base = if in_head {
            head_tree
        } else {
            if removal_committed(&repo, &rel, file, &removal_message) {
                debug!(sr_number, "removal already committed");
                return Ok(true);
            }
            let blob = repo.blob_path(file)?;
            let base = match head_tree {
                Some(tree) => tree,
                None => repo.find_tree(repo.treebuilder(None)?.write()?)?,
            };
            let added = TreeUpdateBuilder::new()
                .upsert(rel.as_path(), blob, FileMode::Blob)
                .create_updated(&repo, &base)?;
            commit(&repo, added, &format!("Add SR {sr_number}"))?;
            debug!(sr_number, file = %rel.display(), "committed untracked file before removal");
            Some(repo.find_tree(added)?)
        };
        let Some(base) = base else {
            return Err(git2::Error::from_str("no tree to remove the file from").into());
        };

        let removed = TreeUpdateBuilder::new()
            .remove(rel.as_path())
            .create_updated(&repo, &base)?;
        let oid = commit(&repo, removed, &removal_message)?;

        let mut index = repo.index()?;
        if index.get_path(&rel, 0).is_some() {
            index.remove_path(&rel)?;
            index.write()?;
        }
        debug!(sr_number, commit = %short(oid), "committed removal");
        Ok(true)
    }

    async fn git(&self, args: &[&str]) -> Result<(), SyncError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SyncError::Command {
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl VersionControl for GitSync {
    async fn pull(&self) -> Result<(), SyncError> {
        if !self.is_under_version_control() {
            debug!(dir = %self.dir.display(), "not under revision control, skipping pull");
            return Ok(());
        }
        self.git(&["pull", "--rebase"]).await
    }

    async fn remove_and_push(&self, file: &Path, sr_number: &str) -> Result<(), SyncError> {
        if !self.commit_removal(file, sr_number)? {
            debug!(dir = %self.dir.display(), "not under revision control, skipping push");
            return Ok(());
        }
        self.git(&["push"]).await
    }
}

fn repo_relative(repo: &Repository, file: &Path) -> Result<PathBuf, SyncError> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| git2::Error::from_str("repository has no working directory"))?
        .canonicalize()?;
    let file = file.canonicalize()?;
    file.strip_prefix(&workdir)
        .map(Path::to_path_buf)
        .map_err(|_| git2::Error::from_str("file is outside the repository").into())
}

fn head_message(repo: &Repository) -> Option<String> {
    let commit = repo.head().ok()?.peel_to_commit().ok()?;
    commit.message().map(|m| m.trim_end().to_string())
}

// HEAD is the removal commit for this SR and its parent held exactly the
// content now in the working copy.
fn removal_committed(repo: &Repository, rel: &Path, file: &Path, message: &str) -> bool {
    if head_message(repo).as_deref() != Some(message) {
        return false;
    }
    let previous = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .and_then(|head| head.parent(0))
        .and_then(|parent| parent.tree())
        .and_then(|tree| tree.get_path(rel));
    let Ok(previous) = previous else {
        return false;
    };
    Oid::hash_file(ObjectType::Blob, file).is_ok_and(|oid| oid == previous.id())
}

fn commit(repo: &Repository, tree_oid: Oid, message: &str) -> Result<Oid, git2::Error> {
    let tree = repo.find_tree(tree_oid)?;

    let sig = repo
        .signature()
        .or_else(|_| Signature::now("srintake", "srintake@localhost"))?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
}

fn short(oid: Oid) -> String {
    oid.to_string()[..7].to_string()
}

/// Best-effort, retry-wrapped front for a [`VersionControl`].
pub struct SyncManager<V> {
    vcs: V,
    policy: RetryPolicy,
}

impl<V: VersionControl> SyncManager<V> {
    pub fn new(vcs: V, policy: RetryPolicy) -> Self {
        Self { vcs, policy }
    }

    /// Pulls before a scan. Returns `false` if every attempt failed.
    pub async fn pull_latest(&self) -> bool {
        let result = self
            .policy
            .run("git pull", |_| self.vcs.pull(), |_: &SyncError| true)
            .await;
        match result {
            Ok(()) => true,
            Err(failure) => {
                warn!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    "pull failed, scanning with local state"
                );
                false
            }
        }
    }

    /// Removes a processed file from revision control and pushes. Returns
    /// `false` if every attempt failed; the work order stays successful.
    pub async fn remove_and_push(&self, file: &Path, sr_number: &str) -> bool {
        let result = self
            .policy
            .run(
                "git remove and push",
                |_| self.vcs.remove_and_push(file, sr_number),
                |_: &SyncError| true,
            )
            .await;
        match result {
            Ok(()) => {
                info!(sr_number, "removal pushed");
                true
            }
            Err(failure) => {
                let error = SyncError::Exhausted {
                    operation: "remove and push",
                    attempts: failure.attempts,
                    last: Box::new(failure.error),
                };
                warn!(sr_number, %error, "sync failed, keeping work order as processed");
                false
            }
        }
    }
}

#[cfg(test)]
impl<V> SyncManager<V> {
    pub fn vcs(&self) -> &V {
        &self.vcs
    }
}
