//! CHECKPOINT phase: commit the reviewed milestone's changes, record the
//! commit sha, and decide whether to continue to the next milestone or
//! move on to FINALIZE.

use chrono::Utc;

use supervisor_core::state_machine::{advance_milestone, all_milestones_done, current_milestone, update_phase};
use supervisor_core::types::{Phase, RunState};

use crate::git::{Git, GitError};

pub fn run(mut state: RunState, git: &Git) -> Result<RunState, GitError> {
    git.add_all()?;
    let goal = current_milestone(&state).map(|m| m.goal.clone()).unwrap_or_default();
    let sha = git.commit(&format!("checkpoint: {goal}"))?;
    state.checkpoint_commit_sha = Some(sha);

    state = advance_milestone(state);

    if all_milestones_done(&state) {
        state = update_phase(state, Phase::Finalize, Utc::now());
    } else {
        state = update_phase(state, Phase::Implement, Utc::now());
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{Milestone, RunId, ScopeLock};
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        Command::new("git").arg("init").current_dir(tmp.path()).output().unwrap();
        Command::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(tmp.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "t"])
            .current_dir(tmp.path())
            .output()
            .unwrap();
        std::fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(tmp.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(tmp.path())
            .output()
            .unwrap();
        tmp
    }

    #[test]
    fn last_milestone_moves_to_finalize() {
        let tmp = init_repo();
        let git = Git::new(tmp.path());
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![Milestone {
                goal: "only one".into(),
                files_expected: vec![],
                done_checks: vec![],
                risk_level: Default::default(),
            }],
            ScopeLock::default(),
            vec![],
            Utc::now(),
        );
        state.phase = Phase::Checkpoint;
        let state = run(state, &git).unwrap();
        assert_eq!(state.phase, Phase::Finalize);
        assert!(state.checkpoint_commit_sha.is_some());
    }

    #[test]
    fn non_last_milestone_returns_to_implement() {
        let tmp = init_repo();
        let git = Git::new(tmp.path());
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![
                Milestone {
                    goal: "first".into(),
                    files_expected: vec![],
                    done_checks: vec![],
                    risk_level: Default::default(),
                },
                Milestone {
                    goal: "second".into(),
                    files_expected: vec![],
                    done_checks: vec![],
                    risk_level: Default::default(),
                },
            ],
            ScopeLock::default(),
            vec![],
            Utc::now(),
        );
        state.phase = Phase::Checkpoint;
        let state = run(state, &git).unwrap();
        assert_eq!(state.phase, Phase::Implement);
        assert_eq!(state.milestone_index, 1);
    }
}
