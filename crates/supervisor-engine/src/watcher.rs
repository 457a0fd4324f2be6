//! Auto-resume watcher: polls stopped runs and resumes the ones whose
//! stop reason is in the resumable family, subject to a cooldown and a
//! bounded attempt count.

use std::time::Duration;

use chrono::Utc;

use supervisor_core::state_machine::{is_resumable_stop_reason, prepare_for_resume};
use supervisor_core::types::{Phase, RunState};

use crate::run_store::{RunStore, RunStoreError};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval_sec: u64,
    pub cooldown_sec: i64,
    pub max_attempts: u32,
}

/// Decision for one stopped run, surfaced so the caller can log it
/// before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    Resume,
    SkipNotResumable,
    SkipCooldown,
    SkipAttemptsExhausted,
    SkipNotStopped,
}

/// Pure decision function: given a run's state and the current time,
/// decide whether to resume it now.
pub fn decide(state: &RunState, config: &WatcherConfig, now: chrono::DateTime<Utc>) -> ResumeDecision {
    if state.phase != Phase::Stopped {
        return ResumeDecision::SkipNotStopped;
    }
    let Some(reason) = state.stop_reason.as_deref() else {
        return ResumeDecision::SkipNotResumable;
    };
    if !is_resumable_stop_reason(reason) {
        return ResumeDecision::SkipNotResumable;
    }
    if state.auto_resume_count >= config.max_attempts {
        return ResumeDecision::SkipAttemptsExhausted;
    }
    let elapsed = (now - state.updated_at).num_seconds();
    if elapsed < config.cooldown_sec {
        return ResumeDecision::SkipCooldown;
    }
    ResumeDecision::Resume
}

/// Run one polling pass over every run in the store, resuming the ones
/// that decide `Resume`. Returns the run ids that were resumed.
pub fn poll_once(
    store: &RunStore,
    config: &WatcherConfig,
    now: chrono::DateTime<Utc>,
) -> Result<Vec<supervisor_core::types::RunId>, RunStoreError> {
    let mut resumed = Vec::new();
    for run_id in store.list_run_ids()? {
        let state = store.load_state(&run_id)?;
        if decide(&state, config, now) == ResumeDecision::Resume {
            let resumed_state = prepare_for_resume(state, now);
            store.save_state(&resumed_state)?;
            resumed.push(run_id);
        }
    }
    Ok(resumed)
}

/// Poll forever at `config.poll_interval_sec`, until `should_stop`
/// returns true. Exposed as a free function (rather than a struct with a
/// `run` method) so the CLI's `watch` subcommand can own the loop.
pub async fn watch_loop(
    store: &RunStore,
    config: &WatcherConfig,
    mut should_stop: impl FnMut() -> bool,
) -> Result<(), RunStoreError> {
    while !should_stop() {
        let resumed = poll_once(store, config, Utc::now())?;
        for run_id in resumed {
            tracing::info!(run_id = %run_id, "auto-resumed run");
        }
        tokio::time::sleep(Duration::from_secs(config.poll_interval_sec)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{RunId, ScopeLock};
    use chrono::TimeZone;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap()
    }

    fn config() -> WatcherConfig {
        WatcherConfig {
            poll_interval_sec: 1,
            cooldown_sec: 60,
            max_attempts: 3,
        }
    }

    fn stopped(reason: &str, updated_at: chrono::DateTime<Utc>, auto_resume_count: u32) -> RunState {
        let mut state = create_initial_state(
            RunId::from_string("20260731090000"),
            vec![],
            ScopeLock::default(),
            vec![],
            now(),
        );
        state.phase = Phase::Stopped;
        state.stop_reason = Some(reason.to_string());
        state.updated_at = updated_at;
        state.auto_resume_count = auto_resume_count;
        state
    }

    #[test]
    fn resumable_reason_past_cooldown_resumes() {
        let state = stopped("worker_timeout", now() - chrono::Duration::seconds(120), 0);
        assert_eq!(decide(&state, &config(), now()), ResumeDecision::Resume);
    }

    #[test]
    fn non_resumable_reason_is_skipped() {
        let state = stopped("scope_violation", now() - chrono::Duration::seconds(120), 0);
        assert_eq!(decide(&state, &config(), now()), ResumeDecision::SkipNotResumable);
    }

    #[test]
    fn within_cooldown_is_skipped() {
        let state = stopped("worker_timeout", now() - chrono::Duration::seconds(5), 0);
        assert_eq!(decide(&state, &config(), now()), ResumeDecision::SkipCooldown);
    }

    #[test]
    fn exhausted_attempts_is_skipped() {
        let state = stopped("worker_timeout", now() - chrono::Duration::seconds(120), 3);
        assert_eq!(
            decide(&state, &config(), now()),
            ResumeDecision::SkipAttemptsExhausted
        );
    }

    #[test]
    fn non_stopped_run_is_skipped() {
        let mut state = stopped("worker_timeout", now(), 0);
        state.phase = Phase::Implement;
        assert_eq!(decide(&state, &config(), now()), ResumeDecision::SkipNotStopped);
    }
}
