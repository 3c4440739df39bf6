use std::time::Duration;

use chrono::Utc;

use super::git::GitRepo;
use super::snapshot::{SnapshotError, SnapshotRepo, autosave_branch_name};

/// Outcome of the should-save predicate. When `save` is true the reason
/// doubles as the autosave commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveDecision {
    pub save: bool,
    pub reason: String,
}

impl SaveDecision {
    fn skip(reason: &str) -> Self {
        Self {
            save: false,
            reason: reason.to_string(),
        }
    }
}

impl SnapshotRepo {
    /// Conjunction of the time gate and the divergence gate.
    pub fn should_save(&self) -> Result<SaveDecision, SnapshotError> {
        evaluate(self.git(), self.min_interval())
    }
}

pub fn evaluate(git: &GitRepo, min_interval: Duration) -> Result<SaveDecision, SnapshotError> {
    let head = git.head()?;
    let user_id = head.id().ok_or(SnapshotError::UnbornHead)?;
    let user = git.commit_info(user_id)?;

    let autosave = match git.resolve_branch(&autosave_branch_name(user_id))? {
        Some(tip) => Some(git.commit_info(tip)?),
        None => None,
    };

    // Time gate: both the user's last commit and the last autosave must be
    // older than the configured interval.
    let now = Utc::now();
    let since_user = now.signed_duration_since(user.author_time);
    if below_interval(since_user, min_interval) {
        return Ok(SaveDecision::skip("user has committed during allowed time"));
    }

    let mut staleness = since_user;
    if let Some(autosave) = &autosave {
        let since_autosave = now.signed_duration_since(autosave.author_time);
        if below_interval(since_autosave, min_interval) {
            return Ok(SaveDecision::skip(
                "autosaved has committed during allowed time",
            ));
        }
        staleness = staleness.min(since_autosave);
    }

    // Divergence gate: the working state must differ from the user commit
    // and, when an autosave exists, from the latest autosave's tree.
    if git.status_vs_tree(user_id)?.is_clean() {
        return Ok(SaveDecision::skip("user commit is up to date"));
    }
    // The autosave leg compares worktree content only: every save puts the
    // user's index back, so the staging side against an autosave tree stays
    // dirty even when a new snapshot would record nothing new.
    if let Some(autosave) = &autosave
        && git.worktree_matches_tree(autosave.id)?
    {
        return Ok(SaveDecision::skip("autosaved commit is up to date"));
    }

    Ok(SaveDecision {
        save: true,
        reason: format!("autosave at {}", render(staleness)),
    })
}

fn below_interval(elapsed: chrono::Duration, min_interval: Duration) -> bool {
    let min_interval =
        chrono::Duration::from_std(min_interval).unwrap_or(chrono::Duration::MAX);
    elapsed < min_interval
}

fn render(elapsed: chrono::Duration) -> String {
    let seconds = elapsed.num_seconds().max(0) as u64;
    humantime::format_duration(Duration::from_secs(seconds)).to_string()
}
