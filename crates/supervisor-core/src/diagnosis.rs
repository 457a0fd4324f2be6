//! Rule-based stop diagnosis.
//!
//! Classifies a stopped run's final state plus its recent event history
//! into a `StopDiagnosis` the operator (or auto-resume watcher) can act
//! on without re-reading the full timeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::events::{Event, EventType};
use crate::types::{Phase, RunState, StopDiagnosis};

/// Rules are tried in order; the first match wins. Order matters because
/// some signals (e.g. a scope violation) are more specific than generic
/// worker failure and should take precedence.
pub fn diagnose(state: &RunState, recent_events: &[Event], now: DateTime<Utc>) -> StopDiagnosis {
    let reason = state.stop_reason.clone().unwrap_or_else(|| "unknown".to_string());

    let (family, primary, confidence, next_actions) = classify(&reason, state, recent_events);

    let mut related_artifacts = BTreeMap::new();
    related_artifacts.insert("timeline".to_string(), "timeline.jsonl".to_string());
    related_artifacts.insert("state".to_string(), "state.json".to_string());

    StopDiagnosis {
        outcome: "stopped".to_string(),
        stop_reason: reason,
        stop_reason_family: family.to_string(),
        primary_diagnosis: primary.to_string(),
        confidence,
        signals: collect_signals(recent_events),
        next_actions: next_actions.into_iter().map(str::to_string).collect(),
        related_artifacts,
        resume_command: resume_command_for(state),
        diagnosed_at: now,
    }
}

fn classify(
    reason: &str,
    state: &RunState,
    recent_events: &[Event],
) -> (&'static str, &'static str, f64, Vec<&'static str>) {
    let last_error = state.last_error.as_deref().unwrap_or("");

    if reason == "auth_expired"
        || last_error.to_ascii_lowercase().contains("401")
        || last_error.to_ascii_lowercase().contains("oauth")
        || last_error.to_ascii_lowercase().contains("login")
    {
        return (
            "auth",
            "worker authentication expired or was rejected",
            0.9,
            vec!["re-authenticate", "run doctor"],
        );
    }

    if reason == "verification_cwd_mismatch" {
        return (
            "verification",
            "verify ran against the wrong working directory and could not find its project files",
            0.85,
            vec!["set verification.cwd", "check tier paths"],
        );
    }

    if reason == "scope_violation" || reason == "guard_violation" || reason == "plan_scope_violation" {
        return (
            "scope",
            "implementer touched a path outside the allowlist or inside the denylist",
            0.95,
            vec!["broaden allowlist", "narrow task"],
        );
    }

    if reason == "ownership_violation" {
        return (
            "scope",
            "implementer touched a path outside this run's declared owned_paths",
            0.9,
            vec!["review ownership_violation events in timeline.jsonl", "widen owned_paths or split the milestone and resume"],
        );
    }

    if reason == "collision_detected" {
        return (
            "collision",
            "another concurrent run claims overlapping file ownership",
            0.9,
            vec!["inspect collision_detected events for the other run id", "wait for the other run to finish or re-scope this one"],
        );
    }

    if reason == "lockfile_restricted" {
        return (
            "scope",
            "implementer modified a lockfile outside the allowed dependency scope",
            0.9,
            vec!["pass --allow-deps", "rewrite task"],
        );
    }

    if reason == "verification_failed_max_retries" || reason.contains("verify") {
        return (
            "verification",
            "a verification tier command failed or its evidence was incomplete",
            0.8,
            vec!["run failing command", "inspect tests_tier0.log"],
        );
    }

    if reason.ends_with("_parse_failed") || reason.contains("parse") {
        return (
            "protocol",
            "worker output did not match the expected marker-delimited JSON protocol",
            0.7,
            vec!["retry with alternate", "open worker response artifact"],
        );
    }

    if reason == "stalled_timeout" || reason == "worker_call_timeout" || reason.contains("worker_timeout") {
        return (
            "timeout",
            "worker subprocess exceeded its time budget",
            0.75,
            vec!["raise worker timeout or inspect last progress", "resume the run"],
        );
    }

    if reason == "max_ticks_reached" {
        return (
            "budget",
            "run exhausted its configured tick budget before finishing",
            0.75,
            vec!["resume with ticks × 1.5"],
        );
    }

    if reason == "time_budget_exceeded" {
        return (
            "budget",
            "run exceeded its overall wall-clock time budget",
            0.75,
            vec!["resume with larger --time"],
        );
    }

    if reason == "guard_violation_dirty" || reason == "dirty_worktree" {
        return (
            "guard",
            "the working tree had uncommitted changes the guard refused to run over",
            0.85,
            vec!["enable worktree mode", "stash"],
        );
    }

    if state.review_rounds >= 1 && has_repeated_review_signal(recent_events) {
        return (
            "review_loop",
            "reviewer repeated the same feedback across rounds without progress",
            0.65,
            vec!["read the reviewer's handoff memo", "consider manual intervention on the current milestone"],
        );
    }

    if reason.contains("max_retries") || reason.contains("milestone_retries") {
        return (
            "retry_exhaustion",
            "milestone exceeded its retry budget without reaching a clean verify",
            0.7,
            vec!["inspect the last worker_result events for this milestone", "split the milestone into smaller steps"],
        );
    }

    (
        "unknown",
        "stop reason did not match a known classification rule",
        0.3,
        vec!["read the full timeline.jsonl manually"],
    )
}

fn has_repeated_review_signal(events: &[Event]) -> bool {
    events
        .iter()
        .filter(|e| e.event_type == EventType::ReviewVerdict)
        .count()
        >= 2
}

fn collect_signals(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .rev()
        .take(10)
        .map(|e| format!("{}@seq{}", e.event_type.as_str(), e.seq))
        .collect()
}

fn resume_command_for(state: &RunState) -> Option<String> {
    if state.phase == Phase::Stopped {
        Some(format!("runr resume {}", state.run_id))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::create_initial_state;
    use crate::types::{RunId, ScopeLock};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap()
    }

    fn stopped_state(reason: &str) -> RunState {
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![],
            ScopeLock::default(),
            vec![],
            now(),
        );
        state.phase = Phase::Stopped;
        state.stop_reason = Some(reason.to_string());
        state
    }

    #[test]
    fn scope_violation_classified_with_high_confidence() {
        let diag = diagnose(&stopped_state("scope_violation"), &[], now());
        assert_eq!(diag.stop_reason_family, "scope");
        assert!(diag.confidence > 0.9);
        assert!(diag.resume_command.is_some());
    }

    #[test]
    fn unrecognized_reason_falls_back_to_unknown_family() {
        let diag = diagnose(&stopped_state("something_bizarre"), &[], now());
        assert_eq!(diag.stop_reason_family, "unknown");
        assert!(diag.confidence < 0.5);
    }

    #[test]
    fn timeout_reason_suggests_resume() {
        let diag = diagnose(&stopped_state("worker_timeout"), &[], now());
        assert_eq!(diag.stop_reason_family, "timeout");
        assert!(diag.next_actions.iter().any(|a| a.contains("resume")));
    }

    #[test]
    fn related_artifacts_always_include_timeline_and_state() {
        let diag = diagnose(&stopped_state("verify_failed"), &[], now());
        assert!(diag.related_artifacts.contains_key("timeline"));
        assert!(diag.related_artifacts.contains_key("state"));
    }

    #[test]
    fn auth_expired_is_classified_as_auth() {
        let diag = diagnose(&stopped_state("auth_expired"), &[], now());
        assert_eq!(diag.stop_reason_family, "auth");
        assert!(diag.next_actions.iter().any(|a| a.contains("re-authenticate")));
    }

    #[test]
    fn verification_cwd_mismatch_is_classified_as_verification() {
        let diag = diagnose(&stopped_state("verification_cwd_mismatch"), &[], now());
        assert_eq!(diag.stop_reason_family, "verification");
        assert!(diag.next_actions.iter().any(|a| a.contains("verification.cwd")));
    }

    #[test]
    fn lockfile_restricted_is_classified_as_scope() {
        let diag = diagnose(&stopped_state("lockfile_restricted"), &[], now());
        assert_eq!(diag.stop_reason_family, "scope");
        assert!(diag.next_actions.iter().any(|a| a.contains("--allow-deps")));
    }

    #[test]
    fn stalled_timeout_matches_exact_reason_string() {
        let diag = diagnose(&stopped_state("stalled_timeout"), &[], now());
        assert_eq!(diag.stop_reason_family, "timeout");
    }

    #[test]
    fn max_ticks_reached_is_classified_as_budget() {
        let diag = diagnose(&stopped_state("max_ticks_reached"), &[], now());
        assert_eq!(diag.stop_reason_family, "budget");
        assert!(diag.next_actions.iter().any(|a| a.contains("1.5")));
    }

    #[test]
    fn time_budget_exceeded_is_classified_as_budget() {
        let diag = diagnose(&stopped_state("time_budget_exceeded"), &[], now());
        assert_eq!(diag.stop_reason_family, "budget");
        assert!(diag.next_actions.iter().any(|a| a.contains("--time")));
    }

    #[test]
    fn guard_violation_dirty_is_classified_as_guard() {
        let diag = diagnose(&stopped_state("guard_violation_dirty"), &[], now());
        assert_eq!(diag.stop_reason_family, "guard");
        assert!(diag.next_actions.iter().any(|a| a.contains("stash")));
    }
}
