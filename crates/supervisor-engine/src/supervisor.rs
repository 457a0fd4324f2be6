//! The supervisor: one cooperative tick loop per run, driven by a single
//! OS process. Parallelism across runs is achieved by running multiple
//! supervisor processes against the same workspace, coordinated only
//! through the filesystem-backed run store and the collision detector —
//! never by spawning multiple runs inside one process.

use chrono::Utc;
use thiserror::Error;

use supervisor_core::collision::{detect_collisions, has_stopping_collision, SiblingRun};
use supervisor_core::config::Config;
use supervisor_core::diagnosis::diagnose;
use supervisor_core::events::{
    CollisionEventPayload, Event, EventPayload, EventType, PhaseTransitionPayload, ScopeEventPayload,
    StopEventPayload,
};
use supervisor_core::scope::{any_path_matches, ScopeGuard};
use supervisor_core::state_machine::{current_milestone, stop_run};
use supervisor_core::types::{Phase, RunState, StopDiagnosis};
use supervisor_core::verify_policy::{RiskTrigger, VerificationContext};
use supervisor_core::worker_protocol::OutputProtocol;

use crate::git::Git;
use crate::handlers::{checkpoint, finalize, implement, plan, review, verify};
use crate::receipt::ReceiptWriter;
use crate::run_store::{RunStore, RunStoreError};
use crate::verify_engine::VerifyEngine;
use crate::worker::WorkerConfig;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] RunStoreError),
    #[error(transparent)]
    Git(#[from] crate::git::GitError),
    #[error(transparent)]
    Plan(#[from] plan::PlanError),
    #[error(transparent)]
    Implement(#[from] implement::ImplementError),
    #[error(transparent)]
    Verify(#[from] verify::VerifyPhaseError),
    #[error(transparent)]
    Review(#[from] review::ReviewError),
    #[error(transparent)]
    Finalize(#[from] finalize::FinalizeError),
    #[error(transparent)]
    Scope(#[from] supervisor_core::scope::ScopeError),
}

pub enum TickResult {
    Continued(RunState),
    Stopped(RunState, StopDiagnosis),
    Finalized(RunState),
}

pub struct Supervisor {
    pub config: Config,
    pub store: RunStore,
    pub git: Git,
}

impl Supervisor {
    pub fn new(config: Config, store: RunStore, git: Git) -> Self {
        Self { config, store, git }
    }

    fn worker_config(&self, role: &str) -> WorkerConfig {
        let (mut command, mut protocol) = match role {
            "planner" => (self.config.planner_cmd.clone(), OutputProtocol::SingleJson),
            "implementer" => (self.config.implementer_cmd.clone(), OutputProtocol::SingleJson),
            "reviewer" => (self.config.reviewer_cmd.clone(), OutputProtocol::SingleJson),
            _ => (String::new(), OutputProtocol::RawText),
        };

        if let Some(over) = self.config.worker_overrides.get(role) {
            if let Some(bin) = &over.bin {
                command = if over.args.is_empty() {
                    bin.clone()
                } else {
                    format!("{bin} {}", over.args.join(" "))
                };
            }
            if let Some(output) = &over.output {
                if let Some(parsed) = OutputProtocol::from_config_str(output) {
                    protocol = parsed;
                }
            }
        }

        WorkerConfig {
            role: role.to_string(),
            command,
            protocol,
            timeout_sec: self.config.worker_timeout_sec,
            retries: self.config.worker_retries,
            retry_backoff_sec: self.config.worker_retry_backoff_sec,
        }
    }

    fn tier_commands(&self) -> verify::TierCommands {
        verify::TierCommands {
            tier0: self.config.tier0_cmds.clone(),
            tier1: self.config.tier1_cmds.clone(),
            tier2: self.config.tier2_cmds.clone(),
        }
    }

    /// Run one phase's worth of work for `state`, persisting the result
    /// before returning.
    pub async fn tick(&self, mut state: RunState, task_prompt: &str) -> Result<TickResult, SupervisorError> {
        if state.phase == Phase::Stopped || state.phase == Phase::Finalize {
            return Ok(TickResult::Finalized(state));
        }

        let entry_phase = state.phase;

        if let Some(report) = self.check_collisions(&state)? {
            self.record_collision(&state.run_id, &report)?;
            state = stop_run(state, "collision_detected", Utc::now());
            self.record_stop(&state.run_id, entry_phase, "collision_detected")?;
            self.store.save_state(&state)?;
            let diagnosis = diagnose(&state, &self.store.tail_events(&state.run_id, 20)?, Utc::now());
            return Ok(TickResult::Stopped(state, diagnosis));
        }

        let result = match state.phase {
            Phase::Init => {
                state = supervisor_core::state_machine::update_phase(state, Phase::Plan, Utc::now());
                Ok(TickResult::Continued(state))
            }
            Phase::Plan => self.tick_plan(state, task_prompt).await,
            Phase::Implement => self.tick_implement(state).await,
            Phase::Verify => self.tick_verify(state).await,
            Phase::Review => self.tick_review(state).await,
            Phase::Checkpoint => self.tick_checkpoint(state),
            Phase::Finalize | Phase::Stopped => unreachable!("handled above"),
        }?;

        match &result {
            TickResult::Continued(state) | TickResult::Finalized(state) => {
                if state.phase != entry_phase {
                    self.record_transition(&state.run_id, Some(entry_phase), state.phase)?;
                }
                self.store.save_state(state)?;
            }
            TickResult::Stopped(state, _) => {
                let reason = state.stop_reason.as_deref().unwrap_or("unknown");
                self.record_stop(&state.run_id, entry_phase, reason)?;
                self.store.save_state(state)?;
            }
        }
        Ok(result)
    }

    fn check_collisions(
        &self,
        state: &RunState,
    ) -> Result<Option<supervisor_core::collision::CollisionReport>, SupervisorError> {
        let siblings: Vec<SiblingRun> = self
            .store
            .list_run_ids()?
            .into_iter()
            .filter(|id| *id != state.run_id)
            .filter_map(|id| self.store.load_state(&id).ok())
            .filter(|s| s.phase != Phase::Stopped && s.phase != Phase::Finalize)
            .map(|s| SiblingRun {
                run_id: s.run_id,
                allowlist: s.scope_lock.allowlist,
                owned_paths: s.owned_paths,
                phase: s.phase,
                last_progress_at: s.last_progress_at,
            })
            .collect();

        let files_expected = current_milestone(state)
            .map(|m| m.files_expected.clone())
            .unwrap_or_default();
        let reports = detect_collisions(&state.scope_lock.allowlist, &files_expected, &siblings, Utc::now());
        if has_stopping_collision(&reports) {
            let stopping = reports
                .into_iter()
                .find(|r| r.kind == supervisor_core::collision::CollisionKind::FileIntersectionStop)
                .expect("has_stopping_collision confirmed one exists");
            return Ok(Some(stopping));
        }
        Ok(None)
    }

    async fn tick_plan(&self, state: RunState, task_prompt: &str) -> Result<TickResult, SupervisorError> {
        let worker_config = self.worker_config("planner");
        let state = plan::run(state, &worker_config, task_prompt).await?;
        Ok(TickResult::Continued(state))
    }

    async fn tick_implement(&self, state: RunState) -> Result<TickResult, SupervisorError> {
        let worker_config = self.worker_config("implementer");
        match implement::run(state, &worker_config, &self.git, &self.config.base_branch).await {
            Ok(implement::ImplementOutcome::Advance(state)) => Ok(TickResult::Continued(state)),
            Ok(implement::ImplementOutcome::RetryMilestone(state)) => {
                self.maybe_stop_on_retry_exhaustion(state)
            }
            Ok(implement::ImplementOutcome::ScopeViolation(state, path, rule)) => {
                self.record_scope_event(&state.run_id, &path, &rule)?;
                Ok(self.stop(state, "scope_violation"))
            }
            Ok(implement::ImplementOutcome::OwnershipViolation(state, path)) => {
                self.record_scope_event(&state.run_id, &path, "ownership_violation")?;
                Ok(self.stop(state, "ownership_violation"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn tick_verify(&self, state: RunState) -> Result<TickResult, SupervisorError> {
        let workdir = self
            .config
            .verification_cwd
            .clone()
            .unwrap_or_else(|| self.git.repo_root().to_path_buf());
        let engine = VerifyEngine::new(workdir, self.config.verify_timeout_sec);

        let changed_files = self.git.diff_name_only(&self.config.base_branch)?;
        // VERIFY only ever runs once per milestone, at its end.
        let is_run_end = state.milestone_index + 1 >= state.milestones.len();
        let context = VerificationContext {
            is_milestone_end: true,
            is_run_end,
        };
        let triggers: Vec<RiskTrigger> = self
            .config
            .risk_triggers
            .iter()
            .map(|t| RiskTrigger {
                name: t.name.clone(),
                tier: t.tier,
                fired: any_path_matches(&t.patterns, &changed_files),
            })
            .collect();

        match verify::run(state, &engine, &self.tier_commands(), &context, &triggers).await {
            Ok(verify::VerifyOutcome::Advance(state)) => Ok(TickResult::Continued(state)),
            Ok(verify::VerifyOutcome::RetryMilestone(state)) => self.maybe_stop_on_retry_exhaustion(state),
            Err(e) => Err(e.into()),
        }
    }

    async fn tick_review(&self, state: RunState) -> Result<TickResult, SupervisorError> {
        let worker_config = self.worker_config("reviewer");
        match review::run(state, &worker_config, self.config.max_review_rounds).await {
            Ok(review::ReviewOutcome::Approved(state)) => Ok(TickResult::Continued(state)),
            Ok(review::ReviewOutcome::RequestChanges(state)) => Ok(TickResult::Continued(state)),
            Ok(review::ReviewOutcome::StoppedReviewLoop(state)) => {
                Ok(self.stop(state, "review_loop_exhausted"))
            }
            Ok(review::ReviewOutcome::Rejected(state)) => {
                let events = self.store.tail_events(&state.run_id, 20).unwrap_or_default();
                let diagnosis = supervisor_core::diagnosis::diagnose(&state, &events, Utc::now());
                Ok(TickResult::Stopped(state, diagnosis))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn tick_checkpoint(&self, state: RunState) -> Result<TickResult, SupervisorError> {
        let state = checkpoint::run(state, &self.git)?;
        Ok(TickResult::Continued(state))
    }

    fn maybe_stop_on_retry_exhaustion(&self, state: RunState) -> Result<TickResult, SupervisorError> {
        if state.milestone_retries >= self.config.max_milestone_retries {
            Ok(self.stop(state, "milestone_retries_exhausted"))
        } else {
            Ok(TickResult::Continued(state))
        }
    }

    fn stop(&self, state: RunState, reason: &str) -> TickResult {
        let state = stop_run(state, reason, Utc::now());
        let events = self.store.tail_events(&state.run_id, 20).unwrap_or_default();
        let diagnosis = diagnose(&state, &events, Utc::now());
        TickResult::Stopped(state, diagnosis)
    }

    fn record_transition(&self, run_id: &supervisor_core::types::RunId, from: Option<Phase>, to: Phase) -> Result<(), SupervisorError> {
        let event = Event {
            seq: 0,
            run_id: run_id.clone(),
            event_type: EventType::PhaseEntered,
            at: Utc::now(),
            phase: Some(to),
            payload: EventPayload::PhaseTransition(PhaseTransitionPayload { from, to, reason: None }),
        };
        self.store.append_event(event)?;
        Ok(())
    }

    fn record_scope_event(&self, run_id: &supervisor_core::types::RunId, path: &str, rule: &str) -> Result<(), SupervisorError> {
        let event = Event {
            seq: 0,
            run_id: run_id.clone(),
            event_type: EventType::ScopeViolation,
            at: Utc::now(),
            phase: Some(Phase::Implement),
            payload: EventPayload::Scope(ScopeEventPayload {
                path: path.to_string(),
                rule: rule.to_string(),
            }),
        };
        self.store.append_event(event)?;
        Ok(())
    }

    fn record_collision(
        &self,
        run_id: &supervisor_core::types::RunId,
        report: &supervisor_core::collision::CollisionReport,
    ) -> Result<(), SupervisorError> {
        let event = Event {
            seq: 0,
            run_id: run_id.clone(),
            event_type: EventType::CollisionDetected,
            at: Utc::now(),
            phase: None,
            payload: EventPayload::Collision(CollisionEventPayload {
                other_run_id: report.other_run_id.clone(),
                kind: format!("{:?}", report.kind),
                overlap: report.overlap.clone(),
            }),
        };
        self.store.append_event(event)?;
        Ok(())
    }

    fn record_stop(&self, run_id: &supervisor_core::types::RunId, phase: Phase, reason: &str) -> Result<(), SupervisorError> {
        let event = Event {
            seq: 0,
            run_id: run_id.clone(),
            event_type: EventType::RunStopped,
            at: Utc::now(),
            phase: Some(phase),
            payload: EventPayload::Stop(StopEventPayload {
                stop_reason: reason.to_string(),
                phase,
            }),
        };
        self.store.append_event(event)?;
        Ok(())
    }

    pub fn finalize(&self, state: &RunState, writer: &ReceiptWriter) -> Result<supervisor_core::types::Receipt, SupervisorError> {
        let receipt = finalize::run(state, &self.git, &self.config.base_branch, writer, None)?;
        Ok(receipt)
    }

    pub fn build_scope_guard(&self, state: &RunState) -> Result<ScopeGuard, SupervisorError> {
        Ok(ScopeGuard::build(&state.scope_lock)?)
    }
}
