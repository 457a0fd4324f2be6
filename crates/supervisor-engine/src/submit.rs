//! Submit/bundle pipeline: cherry-pick integration of a finished run's
//! checkpoint commit onto the target branch, with full conflict recovery.
//!
//! Never a direct merge — the checkpoint SHA is cherry-picked as a single
//! commit onto the target, and the caller's starting branch is always
//! restored before returning, on every path including failure.

use thiserror::Error;

use supervisor_core::types::RunState;

use crate::git::{Git, GitError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("submit validation failed: {reason}")]
    ValidationFailed { reason: String },
    #[error("cherry-pick of checkpoint {checkpoint_sha} onto {target_branch} conflicted on {conflicted_files:?}; starting branch restored")]
    Conflict {
        checkpoint_sha: String,
        target_branch: String,
        conflicted_files: Vec<String>,
    },
}

/// Gates that must hold before a real (non-dry-run) submit mutates git.
pub struct SubmitRequirements {
    pub require_verification: bool,
    pub require_clean_tree: bool,
}

impl Default for SubmitRequirements {
    fn default() -> Self {
        Self {
            require_verification: true,
            require_clean_tree: true,
        }
    }
}

/// A validated, not-yet-executed submit (§4.12 steps 1-2): everything a
/// dry-run prints, and everything a real submit needs to proceed.
#[derive(Debug)]
pub struct SubmitPlan {
    pub checkpoint_sha: String,
    pub target_branch: String,
    pub starting_branch: String,
}

pub struct SubmitOutcome {
    pub target_branch: String,
    pub checkpoint_sha: String,
    pub starting_branch: String,
}

/// §4.12 step 1: checkpoint exists, evidence present if required, tree
/// clean if required, target branch exists. Never mutates git.
pub fn validate(
    state: &RunState,
    git: &Git,
    target_branch: &str,
    requirements: &SubmitRequirements,
) -> Result<SubmitPlan, SubmitError> {
    let Some(checkpoint_sha) = state.checkpoint_commit_sha.clone() else {
        return Err(SubmitError::ValidationFailed {
            reason: "no checkpoint commit on this run".to_string(),
        });
    };

    if requirements.require_verification && !state.verification_evidence.is_complete() {
        return Err(SubmitError::ValidationFailed {
            reason: "verification evidence is incomplete".to_string(),
        });
    }

    if requirements.require_clean_tree && !git.is_clean()? {
        return Err(SubmitError::ValidationFailed {
            reason: "working tree is not clean".to_string(),
        });
    }

    if !git.branch_exists(target_branch)? {
        return Err(SubmitError::ValidationFailed {
            reason: format!("target branch `{target_branch}` does not exist"),
        });
    }

    let starting_branch = git.current_branch()?;
    Ok(SubmitPlan {
        checkpoint_sha,
        target_branch: target_branch.to_string(),
        starting_branch,
    })
}

/// §4.12 steps 2-6: validate, then (unless `dry_run`) checkout the target
/// branch, cherry-pick the checkpoint SHA, and restore the starting
/// branch before returning on every path.
pub fn submit(
    state: &RunState,
    git: &Git,
    target_branch: &str,
    requirements: &SubmitRequirements,
    dry_run: bool,
) -> Result<SubmitPlanOrOutcome, SubmitError> {
    let plan = validate(state, git, target_branch, requirements)?;
    if dry_run {
        return Ok(SubmitPlanOrOutcome::Planned(plan));
    }

    let result = run_cherry_pick(git, &plan);

    git.checkout(&plan.starting_branch)?;
    if result.is_err() && !git.is_clean()? {
        return Err(SubmitError::ValidationFailed {
            reason: "starting branch is not clean after cherry-pick recovery".to_string(),
        });
    }

    result.map(SubmitPlanOrOutcome::Submitted)
}

pub enum SubmitPlanOrOutcome {
    Planned(SubmitPlan),
    Submitted(SubmitOutcome),
}

fn run_cherry_pick(git: &Git, plan: &SubmitPlan) -> Result<SubmitOutcome, SubmitError> {
    git.checkout(&plan.target_branch)?;
    if let Err(GitError::CherryPickConflict { conflicted_files, .. }) = git.cherry_pick(&plan.checkpoint_sha) {
        return Err(SubmitError::Conflict {
            checkpoint_sha: plan.checkpoint_sha.clone(),
            target_branch: plan.target_branch.clone(),
            conflicted_files,
        });
    }
    Ok(SubmitOutcome {
        target_branch: plan.target_branch.clone(),
        checkpoint_sha: plan.checkpoint_sha.clone(),
        starting_branch: plan.starting_branch.clone(),
    })
}

/// Render a deterministic markdown bundle summarizing what would be
/// (or was) submitted: one heading per commit in order, with its
/// one-line subject.
pub fn render_bundle_markdown(run_id: &str, target_branch: &str, subjects: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Submit bundle for run {run_id}\n\n"));
    out.push_str(&format!("Target branch: `{target_branch}`\n\n"));
    out.push_str("## Commits\n\n");
    for (sha, subject) in subjects {
        out.push_str(&format!("- `{}` {}\n", &sha[..sha.len().min(12)], subject));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{RunId, ScopeLock};

    fn state_without_checkpoint() -> RunState {
        create_initial_state(
            RunId::from_string("20260731090000"),
            vec![],
            ScopeLock::default(),
            vec![],
            chrono::Utc::now(),
        )
    }

    #[test]
    fn validate_rejects_missing_checkpoint() {
        let state = state_without_checkpoint();
        let git = Git::new(std::env::temp_dir());
        let err = validate(&state, &git, "main", &SubmitRequirements::default()).unwrap_err();
        assert!(matches!(err, SubmitError::ValidationFailed { .. }));
    }

    #[test]
    fn bundle_markdown_lists_commits_in_order() {
        let subjects = vec![
            ("abcdef1234567890".to_string(), "add parser".to_string()),
            ("1234567890abcdef".to_string(), "fix edge case".to_string()),
        ];
        let md = render_bundle_markdown("20260731090000", "main", &subjects);
        assert!(md.contains("add parser"));
        let add_pos = md.find("add parser").unwrap();
        let fix_pos = md.find("fix edge case").unwrap();
        assert!(add_pos < fix_pos);
    }

    #[test]
    fn bundle_markdown_truncates_long_shas_to_12_chars() {
        let subjects = vec![("abcdef1234567890".to_string(), "subject".to_string())];
        let md = render_bundle_markdown("run", "main", &subjects);
        assert!(md.contains("`abcdef123456`"));
    }
}
