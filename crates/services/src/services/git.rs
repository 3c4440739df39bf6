use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use git2::{
    Delta, DiffOptions, ErrorClass, ErrorCode, IndexAddOption, Repository, Signature, Sort,
    StatusOptions, build::CheckoutBuilder,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),
    #[error("repository at {} has no working directory", .0.display())]
    Bare(PathBuf),
}

const OID_HEX_LEN: usize = 40;

/// Fixed-width object hash, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(git2::Oid);

impl ObjectId {
    fn oid(self) -> git2::Oid {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = GitError;

    /// User-supplied hashes must be full-width hexadecimal.
    fn from_str(s: &str) -> Result<Self, GitError> {
        if s.len() != OID_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GitError::InvalidObjectId(s.to_string()));
        }
        Ok(ObjectId(git2::Oid::from_str(s)?))
    }
}

/// Where HEAD points right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// Symbolic ref to a born branch.
    Branch { refname: String, id: ObjectId },
    Detached(ObjectId),
    /// The branch HEAD names has no commits yet.
    Unborn,
}

impl Head {
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Head::Branch { id, .. } | Head::Detached(id) => Some(*id),
            Head::Unborn => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub author_name: String,
    pub author_time: DateTime<Utc>,
    pub committer_name: String,
    pub committer_email: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unmodified,
    Untracked,
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    UpdatedButUnmerged,
}

/// Per-path (staging, worktree) states. Callers mostly consume `is_clean`;
/// paths with both sides `Unmodified` are not recorded.
#[derive(Debug, Default)]
pub struct WorktreeStatus {
    entries: Vec<(String, FileState, FileState)>,
}

impl WorktreeStatus {
    fn entry_mut(&mut self, path: String) -> &mut (String, FileState, FileState) {
        let pos = match self.entries.iter().position(|(p, _, _)| *p == path) {
            Some(pos) => pos,
            None => {
                self.entries
                    .push((path, FileState::Unmodified, FileState::Unmodified));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos]
    }

    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|(_, staging, worktree)| {
            *staging == FileState::Unmodified && *worktree == FileState::Unmodified
        })
    }
}

/// Byte copy of `.git/index`, captured so the user's staging state can be
/// put back exactly. `None` means the repository had no index file.
pub struct IndexSnapshot {
    bytes: Option<Vec<u8>>,
}

/// Restores the captured index bytes when dropped. Restoration failures are
/// logged, never propagated: they must not mask a primary error.
pub struct IndexGuard<'r> {
    repo: &'r GitRepo,
    snapshot: Option<IndexSnapshot>,
}

impl Drop for IndexGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take()
            && let Err(err) = self.repo.restore_index(&snapshot)
        {
            warn!(repo = %self.repo.path().display(), "failed to restore index: {err}");
        }
    }
}

/// Re-attaches HEAD to the recorded position when dropped, keeping index
/// and worktree as they are.
pub struct HeadGuard<'r> {
    repo: &'r GitRepo,
    head: Option<Head>,
}

impl Drop for HeadGuard<'_> {
    fn drop(&mut self) {
        if let Some(head) = self.head.take()
            && let Err(err) = self.repo.checkout_head_keep(&head)
        {
            warn!(repo = %self.repo.path().display(), "failed to restore checked out ref: {err}");
        }
    }
}

/// An opened repository plus the operations the snapshot engine needs.
/// Everything else in this crate goes through this wrapper; `git2` types do
/// not escape it.
pub struct GitRepo {
    repo: Repository,
    path: PathBuf,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        if repo.is_bare() {
            return Err(GitError::Bare(path.to_path_buf()));
        }
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn head(&self) -> Result<Head, GitError> {
        match self.repo.head() {
            Ok(reference) => {
                let id = ObjectId(reference.peel_to_commit()?.id());
                if self.repo.head_detached()? {
                    Ok(Head::Detached(id))
                } else {
                    let refname = String::from_utf8_lossy(reference.name_bytes()).into_owned();
                    Ok(Head::Branch { refname, id })
                }
            }
            Err(err)
                if err.class() == ErrorClass::Reference
                    && err.code() == ErrorCode::UnbornBranch =>
            {
                Ok(Head::Unborn)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Target of `refs/heads/<name>`, or `None` when the branch is absent.
    pub fn resolve_branch(&self, name: &str) -> Result<Option<ObjectId>, GitError> {
        match self.repo.find_reference(&format!("refs/heads/{name}")) {
            Ok(reference) => Ok(reference.target().map(ObjectId)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn create_branch(&self, name: &str, at: ObjectId) -> Result<(), GitError> {
        self.repo.reference(
            &format!("refs/heads/{name}"),
            at.oid(),
            false,
            "created by autosaved",
        )?;
        Ok(())
    }

    /// Switch HEAD to `refs/heads/<name>` without touching index or worktree
    /// ("checkout with keep").
    pub fn checkout_branch_keep(&self, name: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{name}");
        match self.repo.find_reference(&refname) {
            Ok(_) => {
                self.repo.set_head(&refname)?;
                Ok(())
            }
            Err(err) if err.code() == ErrorCode::NotFound => {
                Err(GitError::ReferenceNotFound(refname))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Point HEAD back at a recorded position, index and worktree untouched.
    pub fn checkout_head_keep(&self, head: &Head) -> Result<(), GitError> {
        match head {
            Head::Branch { refname, .. } => self.repo.set_head(refname)?,
            Head::Detached(id) => self.repo.set_head_detached(id.oid())?,
            Head::Unborn => {}
        }
        Ok(())
    }

    /// Detach HEAD at `id` and force index and worktree to its tree.
    pub fn checkout_detached_force(&self, id: ObjectId) -> Result<(), GitError> {
        let commit = self.repo.find_commit(id.oid())?;
        self.repo.set_head_detached(commit.id())?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }

    /// Move HEAD to `id` leaving index and worktree untouched.
    pub fn reset_soft(&self, id: ObjectId) -> Result<(), GitError> {
        let object = self.repo.find_object(id.oid(), None)?;
        self.repo.reset(&object, git2::ResetType::Soft, None)?;
        Ok(())
    }

    pub fn commit_info(&self, id: ObjectId) -> Result<CommitInfo, GitError> {
        let commit = self.repo.find_commit(id.oid())?;
        Ok(Self::to_commit_info(&commit))
    }

    fn to_commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
        let author = commit.author();
        let committer = commit.committer();
        CommitInfo {
            id: ObjectId(commit.id()),
            author_name: author.name().unwrap_or("").to_string(),
            author_time: DateTime::from_timestamp(author.when().seconds(), 0)
                .unwrap_or_else(Utc::now),
            committer_name: committer.name().unwrap_or("").to_string(),
            committer_email: committer.email().unwrap_or("").to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
        }
    }

    /// Commits reachable from `from` in topological order, at most `limit`.
    pub fn walk_commits(&self, from: ObjectId, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL)?;
        walk.push(from.oid())?;

        let mut commits = Vec::new();
        for oid in walk {
            if commits.len() == limit {
                break;
            }
            let commit = self.repo.find_commit(oid?)?;
            commits.push(Self::to_commit_info(&commit));
        }
        Ok(commits)
    }

    /// Aggregate worktree status against HEAD, ignored entries excluded.
    pub fn worktree_status(&self) -> Result<WorktreeStatus, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let mut status = WorktreeStatus::default();
        for entry in self.repo.statuses(Some(&mut opts))?.iter() {
            let flags = entry.status();
            if flags.is_empty() {
                continue;
            }
            let path = String::from_utf8_lossy(entry.path_bytes()).into_owned();
            let slot = status.entry_mut(path);
            slot.1 = staging_state(flags);
            slot.2 = worktree_state(flags);
        }
        Ok(status)
    }

    /// Two-leg status against an arbitrary commit: tree↔index gives the
    /// staging side, index↔worktree the worktree side, mirroring what
    /// `git status` would report with that commit as the base. Ignored
    /// entries are excluded.
    pub fn status_vs_tree(&self, id: ObjectId) -> Result<WorktreeStatus, GitError> {
        let commit = self.repo.find_commit(id.oid())?;
        let tree = commit.tree()?;
        let index = self.repo.index()?;

        let mut status = WorktreeStatus::default();

        let staged = self
            .repo
            .diff_tree_to_index(Some(&tree), Some(&index), None)?;
        for delta in staged.deltas() {
            status.entry_mut(delta_path(&delta)).1 = delta_state(delta.status());
        }

        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let unstaged = self
            .repo
            .diff_index_to_workdir(Some(&index), Some(&mut opts))?;
        for delta in unstaged.deltas() {
            status.entry_mut(delta_path(&delta)).2 = delta_state(delta.status());
        }

        Ok(status)
    }

    /// Whether the worktree contents equal the commit's tree, regardless of
    /// the index. The staging state against an autosave tree stays dirty
    /// once the user's index has been reinstated, so the autosave gate
    /// compares content directly.
    pub fn worktree_matches_tree(&self, id: ObjectId) -> Result<bool, GitError> {
        let commit = self.repo.find_commit(id.oid())?;
        let tree = commit.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = self
            .repo
            .diff_tree_to_workdir(Some(&tree), Some(&mut opts))?;
        Ok(diff.deltas().len() == 0)
    }

    /// Byte copy of the index file, for exact restoration later.
    pub fn snapshot_index(&self) -> Result<IndexSnapshot, GitError> {
        let index_path = self.repo.path().join("index");
        let bytes = match std::fs::read(&index_path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(IndexSnapshot { bytes })
    }

    pub fn restore_index(&self, snapshot: &IndexSnapshot) -> Result<(), GitError> {
        let index_path = self.repo.path().join("index");
        match &snapshot.bytes {
            Some(bytes) => std::fs::write(&index_path, bytes)?,
            None => match std::fs::remove_file(&index_path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }
        // Drop in-memory index state so later reads see the restored file.
        let mut index = self.repo.index()?;
        index.read(true)?;
        Ok(())
    }

    pub fn index_guard(&self) -> Result<IndexGuard<'_>, GitError> {
        Ok(IndexGuard {
            repo: self,
            snapshot: Some(self.snapshot_index()?),
        })
    }

    pub fn head_guard(&self, head: Head) -> HeadGuard<'_> {
        HeadGuard {
            repo: self,
            head: Some(head),
        }
    }

    /// Stage every non-ignored change (tracked and new) and commit onto the
    /// current HEAD, with the given identity as author and committer.
    pub fn commit_all(&self, message: &str, name: &str, email: &str) -> Result<ObjectId, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let signature = Signature::now(name, email)?;
        let parent = self.repo.head()?.peel_to_commit()?;
        let id = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        Ok(ObjectId(id))
    }
}

fn staging_state(flags: git2::Status) -> FileState {
    if flags.contains(git2::Status::CONFLICTED) {
        FileState::UpdatedButUnmerged
    } else if flags.contains(git2::Status::INDEX_NEW) {
        FileState::Added
    } else if flags.contains(git2::Status::INDEX_MODIFIED)
        || flags.contains(git2::Status::INDEX_TYPECHANGE)
    {
        FileState::Modified
    } else if flags.contains(git2::Status::INDEX_DELETED) {
        FileState::Deleted
    } else if flags.contains(git2::Status::INDEX_RENAMED) {
        FileState::Renamed
    } else {
        FileState::Unmodified
    }
}

fn worktree_state(flags: git2::Status) -> FileState {
    if flags.contains(git2::Status::CONFLICTED) {
        FileState::UpdatedButUnmerged
    } else if flags.contains(git2::Status::WT_NEW) {
        FileState::Untracked
    } else if flags.contains(git2::Status::WT_MODIFIED)
        || flags.contains(git2::Status::WT_TYPECHANGE)
    {
        FileState::Modified
    } else if flags.contains(git2::Status::WT_DELETED) {
        FileState::Deleted
    } else if flags.contains(git2::Status::WT_RENAMED) {
        FileState::Renamed
    } else {
        FileState::Unmodified
    }
}

fn delta_path(delta: &git2::DiffDelta<'_>) -> String {
    delta
        .new_file()
        .path()
        .or_else(|| delta.old_file().path())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn delta_state(delta: Delta) -> FileState {
    match delta {
        Delta::Unmodified | Delta::Ignored | Delta::Unreadable => FileState::Unmodified,
        Delta::Added => FileState::Added,
        Delta::Untracked => FileState::Untracked,
        Delta::Deleted => FileState::Deleted,
        Delta::Modified | Delta::Typechange => FileState::Modified,
        Delta::Renamed => FileState::Renamed,
        Delta::Copied => FileState::Copied,
        Delta::Conflicted => FileState::UpdatedButUnmerged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_roundtrips_through_hex() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let id: ObjectId = hex.parse().unwrap();
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn object_id_rejects_malformed_input() {
        for bad in ["", "abc", "zz23456789abcdef0123456789abcdef01234567"] {
            assert!(matches!(
                bad.parse::<ObjectId>(),
                Err(GitError::InvalidObjectId(_))
            ));
        }
        // one short of full width
        assert!("0123456789abcdef0123456789abcdef0123456"
            .parse::<ObjectId>()
            .is_err());
    }
}
