//! Synchronous git facade.
//!
//! All git operations shell out via `std::process::Command` rather than
//! a git library, matching the teacher's approach: it keeps the
//! supervisor honest about exactly what git command ran (logged at
//! debug level) and avoids a libgit2 binding for operations this
//! infrequent.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("git {command} failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("git output was not valid utf-8")]
    NonUtf8Output,
    #[error("cherry-pick conflict in commit {commit_sha} ({conflicted_files:?})")]
    CherryPickConflict {
        commit_sha: String,
        conflicted_files: Vec<String>,
    },
}

pub struct Git {
    repo_root: PathBuf,
}

impl Git {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(GitError::Spawn)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| GitError::NonUtf8Output)
    }

    /// Same as `run` but does not treat a non-zero exit as an error —
    /// used for cherry-pick, where conflict exit codes are meaningful.
    fn run_allow_failure(&self, args: &[&str]) -> Result<(bool, String, String), GitError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(GitError::Spawn)?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }

    pub fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_string())
    }

    pub fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", rev])?.trim().to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let (ok, _, _) = self.run_allow_failure(&["rev-parse", "--verify", "--quiet", branch])?;
        Ok(ok)
    }

    pub fn create_branch(&self, branch: &str, from: &str) -> Result<(), GitError> {
        self.run(&["branch", branch, from])?;
        Ok(())
    }

    pub fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", branch])?;
        Ok(())
    }

    pub fn is_clean(&self) -> Result<bool, GitError> {
        Ok(self.run(&["status", "--porcelain"])?.trim().is_empty())
    }

    pub fn stash_push(&self, message: &str) -> Result<(), GitError> {
        self.run(&["stash", "push", "-u", "-m", message])?;
        Ok(())
    }

    pub fn stash_pop(&self) -> Result<(), GitError> {
        self.run(&["stash", "pop"])?;
        Ok(())
    }

    pub fn add_all(&self) -> Result<(), GitError> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run(&["commit", "-m", message, "--allow-empty"])?;
        self.head_sha()
    }

    pub fn diff_name_only(&self, base: &str) -> Result<Vec<String>, GitError> {
        let output = self.run(&["diff", "--name-only", base])?;
        Ok(output.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    pub fn diff_patch(&self, base: &str) -> Result<String, GitError> {
        self.run(&["diff", base])
    }

    pub fn diffstat(&self, base: &str) -> Result<String, GitError> {
        self.run(&["diff", "--stat", base])
    }

    /// Cherry-pick `commit_sha` onto the current branch. On conflict,
    /// captures the conflicted paths, aborts the cherry-pick, and returns
    /// `GitError::CherryPickConflict` so the caller can restore the
    /// pre-pick branch state and report which files need manual merging.
    pub fn cherry_pick(&self, commit_sha: &str) -> Result<(), GitError> {
        let (ok, _stdout, _stderr) = self.run_allow_failure(&["cherry-pick", commit_sha])?;
        if ok {
            return Ok(());
        }
        let conflicted_files = self.conflicted_files().unwrap_or_default();
        let _ = self.run_allow_failure(&["cherry-pick", "--abort"]);
        Err(GitError::CherryPickConflict {
            commit_sha: commit_sha.to_string(),
            conflicted_files,
        })
    }

    /// Paths currently in a merge-conflicted state per `git status
    /// --porcelain` (unmerged, added-by-both, or deleted-by-both).
    pub fn conflicted_files(&self) -> Result<Vec<String>, GitError> {
        let output = self.run_allow_failure(&["status", "--porcelain"])?.1;
        Ok(output
            .lines()
            .filter(|line| line.len() > 3)
            .filter(|line| {
                let status = &line[..2];
                status.contains('U') || status == "AA" || status == "DD"
            })
            .map(|line| line[3..].trim().to_string())
            .collect())
    }

    pub fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, GitError> {
        let output = self.run(&["rev-list", "--reverse", &format!("{base}..{head}")])?;
        Ok(output.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}
