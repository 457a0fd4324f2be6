//! Pure state-transition functions over `RunState`.
//!
//! Kept free of I/O so the supervisor loop can unit-test phase logic
//! without touching the filesystem or spawning workers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::types::{Milestone, Phase, RunId, RunState, ScopeLock, VerificationEvidence};

pub fn create_initial_state(
    run_id: RunId,
    milestones: Vec<Milestone>,
    scope_lock: ScopeLock,
    owned_paths: Vec<String>,
    now: DateTime<Utc>,
) -> RunState {
    RunState {
        run_id,
        phase: Phase::Init,
        milestone_index: 0,
        milestones,
        scope_lock,
        owned_paths,
        risk_score: 0.0,
        worker_stats: Default::default(),
        retries: 0,
        milestone_retries: 0,
        review_rounds: 0,
        last_review_fingerprint: None,
        phase_started_at: now,
        started_at: now,
        updated_at: now,
        last_progress_at: now,
        stop_reason: None,
        last_error: None,
        checkpoint_commit_sha: None,
        last_successful_phase: None,
        auto_resume_count: 0,
        phase_attempt: 0,
        verification_evidence: VerificationEvidence::default(),
        last_verify_failure: None,
    }
}

/// Move `state` into `to`, resetting the per-phase attempt counter and
/// stamping `phase_started_at`/`updated_at`. Does not validate that `to`
/// is reachable from the current phase — callers decide that.
pub fn update_phase(mut state: RunState, to: Phase, now: DateTime<Utc>) -> RunState {
    if state.phase != to {
        state.phase_attempt = 0;
    }
    state.phase = to;
    state.phase_started_at = now;
    state.updated_at = now;
    if to != Phase::Stopped {
        state.last_successful_phase = Some(to);
    }
    state
}

/// Record progress (a successful worker/verify step) without changing
/// phase — resets staleness tracking used by the diagnosis engine.
pub fn record_progress(mut state: RunState, now: DateTime<Utc>) -> RunState {
    state.last_progress_at = now;
    state.updated_at = now;
    state
}

/// Transition into the terminal `Stopped` phase with a recorded reason.
pub fn stop_run(mut state: RunState, reason: impl Into<String>, now: DateTime<Utc>) -> RunState {
    state.stop_reason = Some(reason.into());
    state.phase = Phase::Stopped;
    state.updated_at = now;
    state
}

/// Families of stop reason that are considered safe to auto-resume.
const RESUMABLE_STOP_REASONS: [&str; 4] = [
    "worker_timeout",
    "transient_worker_error",
    "verify_timeout",
    "auto_resume_watchdog",
];

pub fn is_resumable_stop_reason(reason: &str) -> bool {
    RESUMABLE_STOP_REASONS.contains(&reason)
}

/// Compute which phase a resumed run should re-enter (§4.9): the phase
/// after `last_successful_phase`, or `Init` if nothing has ever succeeded.
/// A run that isn't `Stopped` has nothing to resume into and re-enters
/// its current phase unchanged.
pub fn compute_resume_target_phase(state: &RunState) -> Phase {
    if state.phase != Phase::Stopped {
        return state.phase;
    }
    match state.last_successful_phase {
        None => Phase::Init,
        Some(phase) => phase.next().unwrap_or(Phase::Finalize),
    }
}

/// Reset the fields that must not carry stale values across a resume:
/// stop reason, last error, and the per-phase attempt counter, while
/// bumping `auto_resume_count`.
pub fn prepare_for_resume(mut state: RunState, now: DateTime<Utc>) -> RunState {
    let target = compute_resume_target_phase(&state);
    state.phase = target;
    state.phase_started_at = now;
    state.updated_at = now;
    state.last_progress_at = now;
    state.stop_reason = None;
    state.last_error = None;
    state.phase_attempt = 0;
    state.auto_resume_count += 1;
    state
}

pub fn current_milestone(state: &RunState) -> Option<&Milestone> {
    state.milestones.get(state.milestone_index)
}

pub fn advance_milestone(mut state: RunState) -> RunState {
    state.milestone_index += 1;
    state.milestone_retries = 0;
    state
}

pub fn all_milestones_done(state: &RunState) -> bool {
    state.milestone_index >= state.milestones.len()
}

/// Stable fingerprint used to detect a review loop: reviewers repeating
/// the same feedback round after round despite implementation attempts.
/// Hashing rather than comparing raw text tolerates whitespace/ordering
/// noise in the reviewer's free-text observations.
pub fn review_fingerprint(observations: &[String]) -> String {
    let mut sorted = observations.to_vec();
    sorted.sort();
    let joined = sorted.join("\n");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True when the current review fingerprint matches the last recorded
/// one, meaning the implementer did not move the reviewer's concerns.
pub fn is_repeated_review(state: &RunState, fingerprint: &str) -> bool {
    state
        .last_review_fingerprint
        .as_deref()
        .is_some_and(|last| last == fingerprint)
}
