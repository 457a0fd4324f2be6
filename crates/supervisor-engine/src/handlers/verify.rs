//! VERIFY phase: select the ordered tier set for the current milestone,
//! run tier0 plus every escalated tier in one pass, and record evidence
//! onto state so REVIEW can trust it without re-running anything.

use chrono::Utc;
use thiserror::Error;

use supervisor_core::state_machine::{current_milestone, update_phase};
use supervisor_core::types::{Phase, RunState};
use supervisor_core::verify_policy::{build_evidence, select_tier, RiskTrigger, VerificationContext};

use crate::verify_engine::{VerifyEngine, VerifyError};

#[derive(Debug, Error)]
pub enum VerifyPhaseError {
    #[error(transparent)]
    Engine(#[from] VerifyError),
    #[error("no current milestone to verify")]
    NoMilestone,
}

pub enum VerifyOutcome {
    Advance(RunState),
    RetryMilestone(RunState),
}

pub async fn run(
    mut state: RunState,
    engine: &VerifyEngine,
    tier_commands: &TierCommands,
    context: &VerificationContext,
    risk_triggers: &[RiskTrigger],
) -> Result<VerifyOutcome, VerifyPhaseError> {
    let milestone = current_milestone(&state).ok_or(VerifyPhaseError::NoMilestone)?.clone();
    let (tiers, _reasons) = select_tier(&milestone, context, risk_triggers);

    let result = engine
        .run_tiers(&tiers, |tier| tier_commands.for_tier(tier).to_vec())
        .await?;

    let commands_run: Vec<String> = result
        .command_results
        .iter()
        .map(|c| c.command.clone())
        .collect();
    state.verification_evidence = build_evidence(&milestone.done_checks, &commands_run, &tiers);

    if !result.ok {
        state.last_verify_failure = Some(result.output.clone());
        state.milestone_retries += 1;
        return Ok(VerifyOutcome::RetryMilestone(state));
    }

    state.last_verify_failure = None;
    state = update_phase(state, Phase::Review, Utc::now());
    Ok(VerifyOutcome::Advance(state))
}

/// The configured command set per tier, resolved from `Config`.
pub struct TierCommands {
    pub tier0: Vec<String>,
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
}

impl TierCommands {
    pub fn for_tier(&self, tier: supervisor_core::types::Tier) -> &[String] {
        match tier {
            supervisor_core::types::Tier::Tier0 => &self.tier0,
            supervisor_core::types::Tier::Tier1 => &self.tier1,
            supervisor_core::types::Tier::Tier2 => &self.tier2,
        }
    }
}
