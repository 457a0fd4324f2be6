//! Core data types for the run supervisor.
//!
//! These mirror the data model in the spec's Data Model section: Run,
//! Milestone, Phase, RunState, WorkerResult, VerifyResult, Receipt, and
//! StopDiagnosis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a run: a 14-digit timestamp (`YYYYMMDDHHMMSS`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Build a run id from a UTC timestamp, matching the 14-digit format.
    pub fn from_timestamp(ts: chrono::DateTime<chrono::Utc>) -> Self {
        Self(ts.format("%Y%m%d%H%M%S").to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Risk level assigned to a milestone by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A unit of work produced by the plan phase.
///
/// Mutated only by the state machine's `milestone_index` cursor; the
/// milestone's own fields never change after planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub goal: String,
    #[serde(default)]
    pub files_expected: Vec<String>,
    #[serde(default)]
    pub done_checks: Vec<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// Phase ordering is the list order below for resume-target purposes;
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Plan,
    Implement,
    Verify,
    Review,
    Checkpoint,
    Finalize,
    Stopped,
}

impl Phase {
    /// Canonical forward order, excluding `Stopped`.
    const ORDER: [Phase; 7] = [
        Phase::Init,
        Phase::Plan,
        Phase::Implement,
        Phase::Verify,
        Phase::Review,
        Phase::Checkpoint,
        Phase::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Plan => "PLAN",
            Self::Implement => "IMPLEMENT",
            Self::Verify => "VERIFY",
            Self::Review => "REVIEW",
            Self::Checkpoint => "CHECKPOINT",
            Self::Finalize => "FINALIZE",
            Self::Stopped => "STOPPED",
        }
    }

    /// The phase immediately after `self` in canonical order.
    /// `Finalize` has no successor and maps to itself; `Stopped` has none.
    pub fn next(self) -> Option<Phase> {
        if self == Phase::Stopped {
            return None;
        }
        if self == Phase::Finalize {
            return Some(Phase::Finalize);
        }
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

/// Tier of verification commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Tier0,
    Tier1,
    Tier2,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier0 => "tier0",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
        }
    }
}

/// Status returned by a worker invocation (§3.1 `WorkerResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ok,
    Blocked,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

/// Parsed, schema-validated result of a worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub status: WorkerStatus,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default)]
    pub handoff_memo: Option<String>,
}

/// Result of executing one verification tier (§3.1 `VerifyResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub tier: Tier,
    pub commands: Vec<String>,
    pub command_results: Vec<CommandResult>,
    pub ok: bool,
    pub duration_ms: u64,
    pub output: String,
}

/// Result of one verification command within a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: Option<i32>,
    pub ok: bool,
    pub duration_ms: u64,
}

/// Evidence recorded onto state so reviewers can prove required commands ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationEvidence {
    pub commands_required: Vec<String>,
    pub commands_run: Vec<String>,
    pub commands_missing: Vec<String>,
    pub tiers_run: Vec<Tier>,
}

/// Allowlist/denylist/lockfile scope configuration, snapshotted onto state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeLock {
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub lockfiles: Vec<String>,
    pub allow_deps: bool,
    pub env_allowlist: Vec<String>,
}

/// Per-worker invocation counters, keyed by role.
pub type WorkerStats = BTreeMap<String, WorkerRoleStats>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerRoleStats {
    pub invocations: u32,
    pub failures: u32,
    pub parse_failures: u32,
    pub total_duration_ms: u64,
}

/// The single durable record for one run (§3.1 `RunState`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub phase: Phase,
    pub milestone_index: usize,
    pub milestones: Vec<Milestone>,
    pub scope_lock: ScopeLock,
    pub owned_paths: Vec<String>,
    pub risk_score: f64,
    pub worker_stats: WorkerStats,
    pub retries: u32,
    pub milestone_retries: u32,
    pub review_rounds: u32,
    pub last_review_fingerprint: Option<String>,
    pub phase_started_at: chrono::DateTime<chrono::Utc>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_progress_at: chrono::DateTime<chrono::Utc>,
    pub stop_reason: Option<String>,
    pub last_error: Option<String>,
    pub checkpoint_commit_sha: Option<String>,
    pub last_successful_phase: Option<Phase>,
    pub auto_resume_count: u32,
    /// Attempt counter for the *current* phase; resets when the phase changes.
    pub phase_attempt: u32,
    pub verification_evidence: VerificationEvidence,
    #[serde(default)]
    pub last_verify_failure: Option<String>,
}

/// Summary emitted at terminal state (§3.1 `Receipt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub run_id: RunId,
    pub base_sha: Option<String>,
    pub checkpoint_sha: Option<String>,
    pub verification_tier: Option<Tier>,
    pub terminal_state: String,
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub artifacts_written: ArtifactsWritten,
}

/// Truthful map of which receipt sidecars exist on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsWritten {
    pub diff_patch: bool,
    pub diffstat: bool,
    pub files_list: bool,
    pub transcript: bool,
}

/// Structured stop handoff (§3.1 `StopDiagnosis`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDiagnosis {
    pub outcome: String,
    pub stop_reason: String,
    pub stop_reason_family: String,
    pub primary_diagnosis: String,
    pub confidence: f64,
    pub signals: Vec<String>,
    pub next_actions: Vec<String>,
    pub related_artifacts: BTreeMap<String, String>,
    pub resume_command: Option<String>,
    pub diagnosed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_next_advances_in_canonical_order() {
        assert_eq!(Phase::Init.next(), Some(Phase::Plan));
        assert_eq!(Phase::Plan.next(), Some(Phase::Implement));
        assert_eq!(Phase::Implement.next(), Some(Phase::Verify));
        assert_eq!(Phase::Verify.next(), Some(Phase::Review));
        assert_eq!(Phase::Review.next(), Some(Phase::Checkpoint));
        assert_eq!(Phase::Checkpoint.next(), Some(Phase::Finalize));
    }

    #[test]
    fn phase_finalize_is_a_fixed_point() {
        assert_eq!(Phase::Finalize.next(), Some(Phase::Finalize));
    }

    #[test]
    fn phase_stopped_has_no_next() {
        assert_eq!(Phase::Stopped.next(), None);
    }

    #[test]
    fn run_id_from_timestamp_is_14_digits() {
        use chrono::TimeZone;
        let ts = chrono::Utc.with_ymd_and_hms(2026, 7, 31, 9, 5, 3).unwrap();
        let id = RunId::from_timestamp(ts);
        assert_eq!(id.0.len(), 14);
        assert_eq!(id.0, "20260731090503");
    }

    #[test]
    fn worker_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerStatus::Blocked).unwrap(),
            "\"blocked\""
        );
    }

    #[test]
    fn phase_serializes_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::Implement).unwrap(), "\"IMPLEMENT\"");
        assert_eq!(serde_json::to_string(&Phase::Stopped).unwrap(), "\"STOPPED\"");
    }
}
