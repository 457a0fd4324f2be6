//! REVIEW phase: invoke the reviewer worker and act on its verdict.
//!
//! Fail-closed: if the run's verification evidence is incomplete (some
//! required command never ran), the reviewer is never even asked —
//! the phase synthesizes a `request_changes` verdict itself, since an
//! incomplete evidence record makes any reviewer verdict untrustworthy.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use supervisor_core::state_machine::{is_repeated_review, review_fingerprint, stop_run, update_phase};
use supervisor_core::types::{Phase, RunState};
use supervisor_core::worker_protocol::{extract_marked_block, ProtocolError};

use crate::worker::{self, WorkerConfig, WorkerError};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("reviewer output had no BEGIN_JSON/END_JSON block: {0}")]
    MissingReviewBlock(#[source] ProtocolError),
    #[error("reviewer output did not parse: {0}")]
    InvalidReview(#[source] serde_json::Error),
}

/// Spec §6.3's Review wire schema: distinct from the generic
/// `WorkerResult{ok|blocked|failed}` used by planner/implementer.
#[derive(Debug, Deserialize)]
struct ReviewOutput {
    status: ReviewStatus,
    #[serde(default)]
    changes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReviewStatus {
    Approve,
    RequestChanges,
    Reject,
}

pub enum ReviewOutcome {
    Approved(RunState),
    RequestChanges(RunState),
    StoppedReviewLoop(RunState),
    Rejected(RunState),
}

pub async fn run(
    mut state: RunState,
    worker_config: &WorkerConfig,
    max_review_rounds: u32,
) -> Result<ReviewOutcome, ReviewError> {
    if !state.verification_evidence.is_complete() {
        return Ok(request_changes(state));
    }

    let prompt = format!(
        "Review milestone {} with verification evidence: {:?}",
        state.milestone_index, state.verification_evidence.commands_run
    );
    let outcome = worker::invoke(worker_config, &prompt).await?;
    let block = extract_marked_block(&outcome.raw_transcript).map_err(ReviewError::MissingReviewBlock)?;
    let review: ReviewOutput = serde_json::from_str(block).map_err(ReviewError::InvalidReview)?;

    let fingerprint = review_fingerprint(&review.changes);
    let repeated = is_repeated_review(&state, &fingerprint);
    state.last_review_fingerprint = Some(fingerprint);

    match review.status {
        ReviewStatus::Approve => {
            state = update_phase(state, Phase::Checkpoint, Utc::now());
            Ok(ReviewOutcome::Approved(state))
        }
        ReviewStatus::Reject => {
            state = stop_run(state, "review_rejected", Utc::now());
            Ok(ReviewOutcome::Rejected(state))
        }
        ReviewStatus::RequestChanges => {
            state.review_rounds += 1;
            if repeated && state.review_rounds >= max_review_rounds {
                return Ok(ReviewOutcome::StoppedReviewLoop(state));
            }
            Ok(request_changes(state))
        }
    }
}

fn request_changes(mut state: RunState) -> ReviewOutcome {
    state = update_phase(state, Phase::Implement, Utc::now());
    ReviewOutcome::RequestChanges(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{RunId, ScopeLock, VerificationEvidence};

    fn state_with_evidence(complete: bool) -> RunState {
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![],
            ScopeLock::default(),
            vec![],
            Utc::now(),
        );
        state.phase = Phase::Review;
        state.verification_evidence = VerificationEvidence {
            commands_required: vec!["cargo test".to_string()],
            commands_run: if complete { vec!["cargo test".to_string()] } else { vec![] },
            commands_missing: if complete { vec![] } else { vec!["cargo test".to_string()] },
            tiers_run: vec![],
        };
        state
    }

    #[tokio::test]
    async fn incomplete_evidence_fails_closed_without_invoking_reviewer() {
        let state = state_with_evidence(false);
        let worker_config = WorkerConfig {
            role: "reviewer".to_string(),
            command: "false".to_string(),
            protocol: supervisor_core::worker_protocol::OutputProtocol::RawText,
            timeout_sec: 5,
            retries: 0,
            retry_backoff_sec: 0,
        };
        let outcome = run(state, &worker_config, 3).await.unwrap();
        match outcome {
            ReviewOutcome::RequestChanges(state) => assert_eq!(state.phase, Phase::Implement),
            _ => panic!("expected request_changes"),
        }
    }

    #[test]
    fn review_output_parses_approve_with_no_changes() {
        let parsed: ReviewOutput = serde_json::from_str(r#"{"status":"approve","changes":[]}"#).unwrap();
        assert_eq!(parsed.status, ReviewStatus::Approve);
        assert!(parsed.changes.is_empty());
    }

    #[test]
    fn review_output_parses_reject_with_changes() {
        let parsed: ReviewOutput =
            serde_json::from_str(r#"{"status":"reject","changes":["unsafe unwrap in hot path"]}"#).unwrap();
        assert_eq!(parsed.status, ReviewStatus::Reject);
        assert_eq!(parsed.changes, vec!["unsafe unwrap in hot path".to_string()]);
    }
}
