use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::git::{CommitInfo, GitError, GitRepo, ObjectId};

/// The leading `_` sorts first, so autosave branches group together at the
/// top of branch listings.
pub const AUTOSAVE_BRANCH_PREFIX: &str = "_asd_";

/// Committer identity that marks a commit as an autosave. An exact match on
/// both fields is the only classification rule; a user who configures this
/// very identity makes their own commits indistinguishable from autosaves.
pub const AUTOSAVE_SIGNATURE_NAME: &str = "autosaved";
pub const AUTOSAVE_SIGNATURE_EMAIL: &str = "autosaved@example.com";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("nothing to save")]
    NothingToSave,
    #[error("repository HEAD has no commits yet")]
    UnbornHead,
    #[error("invalid commit hash: {0}")]
    InvalidHash(String),
    #[error("restore was not confirmed")]
    UserDidNotConfirm,
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Asks before a destructive operation. The CLI prompts on the terminal;
/// tests inject a fixed answer.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Branch name encoding its anchor: `_asd_<hex of the user commit>`.
pub fn autosave_branch_name(anchor: ObjectId) -> String {
    format!("{AUTOSAVE_BRANCH_PREFIX}{anchor}")
}

pub fn is_autosave_commit(commit: &CommitInfo) -> bool {
    commit.committer_name == AUTOSAVE_SIGNATURE_NAME
        && commit.committer_email == AUTOSAVE_SIGNATURE_EMAIL
}

/// One user commit with the autosave chain anchored to it.
#[derive(Debug)]
pub struct ListEntry {
    pub commit: CommitInfo,
    pub autosaves: Vec<CommitInfo>,
}

/// One watched repository: the opened handle plus its settings snapshot.
pub struct SnapshotRepo {
    git: GitRepo,
    min_interval: Duration,
}

impl SnapshotRepo {
    pub fn open(path: &Path, min_interval: Duration) -> Result<Self, SnapshotError> {
        Ok(Self {
            git: GitRepo::open(path)?,
            min_interval,
        })
    }

    pub fn path(&self) -> &Path {
        self.git.path()
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub(crate) fn git(&self) -> &GitRepo {
        &self.git
    }

    /// Record the current worktree as one commit on the autosave branch
    /// anchored at HEAD. The user's checked-out ref, index and worktree are
    /// exactly as before on every exit path, success included.
    pub fn save(&self, message: &str) -> Result<ObjectId, SnapshotError> {
        if self.git.worktree_status()?.is_clean() {
            return Err(SnapshotError::NothingToSave);
        }

        // Guards unwind in LIFO order: the checkout goes back first, then
        // the index bytes.
        let _index = self.git.index_guard()?;

        let head = self.git.head()?;
        let anchor = head.id().ok_or(SnapshotError::UnbornHead)?;
        let branch = autosave_branch_name(anchor);
        let _head = self.git.head_guard(head);

        match self.git.checkout_branch_keep(&branch) {
            Ok(()) => {}
            Err(GitError::ReferenceNotFound(_)) => {
                self.git.create_branch(&branch, anchor)?;
                self.git.checkout_branch_keep(&branch)?;
            }
            Err(err) => return Err(err.into()),
        }

        let id = self
            .git
            .commit_all(message, AUTOSAVE_SIGNATURE_NAME, AUTOSAVE_SIGNATURE_EMAIL)?;
        debug!(repo = %self.path().display(), commit = %id, branch = %branch, "created autosave commit");
        Ok(id)
    }

    /// Materialize the snapshot `hash` in the worktree while HEAD stays on
    /// the user's current position; the snapshot then shows up as
    /// uncommitted changes against it.
    pub fn restore(
        &self,
        hash: &str,
        confirmation: &dyn Confirmation,
    ) -> Result<(), SnapshotError> {
        let target: ObjectId = hash
            .parse()
            .map_err(|_| SnapshotError::InvalidHash(hash.to_string()))?;
        self.git.commit_info(target)?;

        let prompt = format!(
            "This overwrites uncommitted changes in the worktree with the contents of {target}.\n\
             You can inspect them first with `git diff HEAD..{target}`. Continue?"
        );
        if !confirmation.confirm(&prompt) {
            return Err(SnapshotError::UserDidNotConfirm);
        }

        let head = self.git.head()?;
        let original = head.id().ok_or(SnapshotError::UnbornHead)?;

        self.git.checkout_detached_force(target)?;
        self.git.reset_soft(original)?;
        self.git.checkout_head_keep(&head)?;

        info!(repo = %self.path().display(), snapshot = %target, "restored snapshot into worktree");
        Ok(())
    }

    /// User history from HEAD, each anchor joined with its autosave chain.
    /// `limit` bounds the user commits walked, `autosaves_per_commit` the
    /// chain under each of them.
    pub fn list(
        &self,
        limit: usize,
        autosaves_per_commit: usize,
    ) -> Result<Vec<ListEntry>, SnapshotError> {
        let head = self.git.head()?;
        let from = head.id().ok_or(SnapshotError::UnbornHead)?;

        let mut entries = Vec::new();
        for commit in self.git.walk_commits(from, limit)? {
            let autosaves = self.autosaves_for(commit.id, autosaves_per_commit)?;
            entries.push(ListEntry { commit, autosaves });
        }
        Ok(entries)
    }

    fn autosaves_for(
        &self,
        anchor: ObjectId,
        cap: usize,
    ) -> Result<Vec<CommitInfo>, SnapshotError> {
        let branch = autosave_branch_name(anchor);
        let Some(tip) = self.git.resolve_branch(&branch)? else {
            return Ok(Vec::new());
        };

        let mut autosaves = Vec::new();
        // cap + 1 lets the walk see the anchor commit that ends the chain
        for commit in self.git.walk_commits(tip, cap.saturating_add(1))? {
            if autosaves.len() == cap || !is_autosave_commit(&commit) {
                break;
            }
            autosaves.push(commit);
        }
        Ok(autosaves)
    }
}
