//! IMPLEMENT phase: invoke the implementer worker for the current
//! milestone, enforce scope on the resulting diff, and decide whether to
//! advance, retry the milestone, or stop.

use chrono::Utc;
use thiserror::Error;

use supervisor_core::scope::{OwnershipGuard, ScopeGuard, ScopeViolation};
use supervisor_core::state_machine::{current_milestone, update_phase};
use supervisor_core::types::{Phase, RunState, WorkerStatus};

use crate::git::{Git, GitError};
use crate::worker::{self, WorkerConfig, WorkerError};

#[derive(Debug, Error)]
pub enum ImplementError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("no current milestone to implement")]
    NoMilestone,
    #[error("implementer reported blocked: {0:?}")]
    Blocked(Vec<String>),
}

#[derive(Debug)]
pub enum ImplementOutcome {
    Advance(RunState),
    RetryMilestone(RunState),
    ScopeViolation(RunState, String, String),
    OwnershipViolation(RunState, String),
}

pub async fn run(
    mut state: RunState,
    worker_config: &WorkerConfig,
    git: &Git,
    base_branch: &str,
) -> Result<ImplementOutcome, ImplementError> {
    let milestone = current_milestone(&state).ok_or(ImplementError::NoMilestone)?.clone();
    let prompt = format!("Milestone goal: {}\n", milestone.goal);

    let outcome = worker::invoke(worker_config, &prompt).await?;

    match outcome.result.status {
        WorkerStatus::Failed => {
            state.milestone_retries += 1;
            return Ok(ImplementOutcome::RetryMilestone(state));
        }
        WorkerStatus::Blocked => {
            return Err(ImplementError::Blocked(outcome.result.observations));
        }
        WorkerStatus::Ok => {}
    }

    let changed_files = git.diff_name_only(base_branch)?;
    let guard = match ScopeGuard::build(&state.scope_lock) {
        Ok(guard) => guard,
        Err(e) => return Ok(ImplementOutcome::ScopeViolation(state, "<scope-build>".to_string(), e.to_string())),
    };
    let (_, out_of_scope) = guard.partition_changed_files(changed_files.iter().map(String::as_str));
    if let Some((path, violation)) = out_of_scope.first() {
        return Ok(ImplementOutcome::ScopeViolation(
            state,
            (*path).to_string(),
            violation_reason(violation),
        ));
    }

    if !state.owned_paths.is_empty() {
        let ownership = match OwnershipGuard::build(&state.owned_paths) {
            Ok(guard) => guard,
            Err(e) => return Ok(ImplementOutcome::ScopeViolation(state, "<ownership-build>".to_string(), e.to_string())),
        };
        if let Some(unowned) = changed_files.iter().find(|f| !ownership.is_owned(f)) {
            return Ok(ImplementOutcome::OwnershipViolation(state, unowned.clone()));
        }
    }

    state = update_phase(state, Phase::Verify, Utc::now());
    Ok(ImplementOutcome::Advance(state))
}

fn violation_reason(violation: &ScopeViolation) -> String {
    violation.as_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{Milestone, RunId, ScopeLock};

    fn state_with_milestone() -> RunState {
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![Milestone {
                goal: "add parser".into(),
                files_expected: vec![],
                done_checks: vec![],
                risk_level: Default::default(),
            }],
            ScopeLock::default(),
            vec![],
            Utc::now(),
        );
        state.phase = Phase::Implement;
        state
    }

    #[tokio::test]
    async fn missing_milestone_errors() {
        let mut state = state_with_milestone();
        state.milestones.clear();
        let worker_config = WorkerConfig {
            role: "implementer".to_string(),
            command: "true".to_string(),
            protocol: supervisor_core::worker_protocol::OutputProtocol::RawText,
            timeout_sec: 5,
            retries: 0,
            retry_backoff_sec: 0,
        };
        let git = Git::new(std::env::temp_dir());
        let err = run(state, &worker_config, &git, "main").await.unwrap_err();
        assert!(matches!(err, ImplementError::NoMilestone));
    }

    fn init_scratch_repo() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git").arg("-C").arg(dir.path()).args(args).output().unwrap()
        };
        run(&["init"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["config", "user.name", "t"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "init"]);
        let out = std::process::Command::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .output()
            .unwrap();
        let branch = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (dir, branch)
    }

    fn write_ok_worker_script(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("implementer.sh");
        let script = "#!/bin/sh\ncat <<'EOF'\nBEGIN_JSON\n{\"status\":\"ok\",\"observations\":[],\"commands_run\":[],\"handoff_memo\":null}\nEND_JSON\nEOF\n";
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn ownership_violation_when_change_falls_outside_owned_paths() {
        let (repo, branch) = init_scratch_repo();
        std::fs::write(repo.path().join("unowned.txt"), "surprise\n").unwrap();
        std::process::Command::new("git")
            .arg("-C")
            .arg(repo.path())
            .args(["add", "-A"])
            .output()
            .unwrap();

        let mut state = state_with_milestone();
        state.owned_paths = vec!["owned/**".to_string()];
        let worker_config = WorkerConfig {
            role: "implementer".to_string(),
            command: write_ok_worker_script(repo.path()),
            protocol: supervisor_core::worker_protocol::OutputProtocol::SingleJson,
            timeout_sec: 5,
            retries: 0,
            retry_backoff_sec: 0,
        };
        let git = Git::new(repo.path());
        let outcome = run(state, &worker_config, &git, &branch).await.unwrap();
        match outcome {
            ImplementOutcome::OwnershipViolation(_, path) => assert_eq!(path, "unowned.txt"),
            _ => panic!("expected OwnershipViolation"),
        }
    }
}
