//! Append-only event log entries.
//!
//! Every state transition is recorded as an `Event` before the state
//! snapshot is rewritten, so `timeline.jsonl` is always the more complete
//! of the two files after a crash.

use crate::types::{Phase, RunId, Tier};
use serde::{Deserialize, Serialize};

/// Discriminant for the append-only timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    PhaseEntered,
    PhaseCompleted,
    WorkerInvoked,
    WorkerResult,
    VerifyStarted,
    VerifyCompleted,
    ReviewVerdict,
    CheckpointCreated,
    ScopeViolation,
    CollisionDetected,
    RunStopped,
    RunResumed,
    Diagnosed,
    SubmitValidationFailed,
    SubmitConflict,
    RunSubmitted,
    ReceiptWritten,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::PhaseEntered => "phase_entered",
            Self::PhaseCompleted => "phase_completed",
            Self::WorkerInvoked => "worker_invoked",
            Self::WorkerResult => "worker_result",
            Self::VerifyStarted => "verify_started",
            Self::VerifyCompleted => "verify_completed",
            Self::ReviewVerdict => "review_verdict",
            Self::CheckpointCreated => "checkpoint_created",
            Self::ScopeViolation => "scope_violation",
            Self::CollisionDetected => "collision_detected",
            Self::RunStopped => "run_stopped",
            Self::RunResumed => "run_resumed",
            Self::Diagnosed => "diagnosed",
            Self::SubmitValidationFailed => "submit_validation_failed",
            Self::SubmitConflict => "submit_conflict",
            Self::RunSubmitted => "run_submitted",
            Self::ReceiptWritten => "receipt_written",
        }
    }
}

/// One line of `timeline.jsonl`.
///
/// `seq` is assigned by the run store from `seq.txt` and is strictly
/// increasing within a run; it is the tie-breaker when `at` collides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub run_id: RunId,
    pub event_type: EventType,
    pub at: chrono::DateTime<chrono::Utc>,
    pub phase: Option<Phase>,
    pub payload: EventPayload,
}

/// Untagged union of event-specific payloads. `#[serde(untagged)]` keeps
/// the wire shape flat (no `{"type": ..., "data": ...}` nesting) at the
/// cost of requiring unambiguous field sets across variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    PhaseTransition(PhaseTransitionPayload),
    Worker(WorkerEventPayload),
    Verify(VerifyEventPayload),
    Review(ReviewEventPayload),
    Checkpoint(CheckpointEventPayload),
    Scope(ScopeEventPayload),
    Collision(CollisionEventPayload),
    Stop(StopEventPayload),
    Submit(SubmitEventPayload),
    Generic(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransitionPayload {
    pub from: Option<Phase>,
    pub to: Phase,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEventPayload {
    pub role: String,
    pub attempt: u32,
    pub duration_ms: Option<u64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEventPayload {
    pub tier: Tier,
    pub ok: Option<bool>,
    pub duration_ms: Option<u64>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEventPayload {
    pub verdict: String,
    pub fingerprint: String,
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEventPayload {
    pub commit_sha: String,
    pub milestone_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeEventPayload {
    pub path: String,
    pub rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionEventPayload {
    pub other_run_id: RunId,
    pub kind: String,
    pub overlap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEventPayload {
    pub stop_reason: String,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEventPayload {
    pub target_branch: String,
    pub reason: Option<String>,
    pub conflicted_files: Vec<String>,
    pub checkpoint_sha: Option<String>,
}

impl Event {
    pub fn to_jsonl_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_jsonl_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event() -> Event {
        Event {
            seq: 1,
            run_id: RunId::from_string("20260731090503"),
            event_type: EventType::PhaseEntered,
            at: Utc::now(),
            phase: Some(Phase::Plan),
            payload: EventPayload::PhaseTransition(PhaseTransitionPayload {
                from: Some(Phase::Init),
                to: Phase::Plan,
                reason: None,
            }),
        }
    }

    #[test]
    fn event_round_trips_through_jsonl() {
        let ev = sample_event();
        let line = ev.to_jsonl_line().unwrap();
        assert!(!line.contains('\n'));
        let back = Event::from_jsonl_line(&line).unwrap();
        assert_eq!(back.seq, ev.seq);
        assert_eq!(back.event_type.as_str(), "phase_entered");
    }

    #[test]
    fn unknown_payload_fields_fall_back_to_generic() {
        let line = r#"{"seq":2,"run_id":"x","event_type":"diagnosed","at":"2026-07-31T09:00:00Z","phase":null,"payload":{"foo":"bar"}}"#;
        let ev = Event::from_jsonl_line(line).unwrap();
        assert!(matches!(ev.payload, EventPayload::Generic(_)));
    }
}
