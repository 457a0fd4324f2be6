//! PLAN phase: invoke the planner worker, parse the milestone list it
//! produces, and snapshot the scope lock for the run.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use supervisor_core::state_machine::update_phase;
use supervisor_core::types::{Milestone, Phase, RunState};
use supervisor_core::worker_protocol::{extract_marked_block, ProtocolError};

use crate::worker::{self, WorkerConfig, WorkerError};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("planner output had no BEGIN_JSON/END_JSON milestone block: {0}")]
    MissingMilestoneBlock(#[source] ProtocolError),
    #[error("planner milestone block did not parse: {0}")]
    InvalidPlan(#[source] serde_json::Error),
    #[error("planner produced zero milestones")]
    EmptyPlan,
}

#[derive(Debug, Deserialize)]
struct PlanOutput {
    milestones: Vec<Milestone>,
}

pub async fn run(
    mut state: RunState,
    worker_config: &WorkerConfig,
    task_prompt: &str,
) -> Result<RunState, PlanError> {
    let outcome = worker::invoke(worker_config, task_prompt).await?;
    let block = extract_marked_block(&outcome.raw_transcript).map_err(PlanError::MissingMilestoneBlock)?;
    let plan: PlanOutput = serde_json::from_str(block).map_err(PlanError::InvalidPlan)?;
    if plan.milestones.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let declared: Vec<String> = plan
        .milestones
        .iter()
        .flat_map(|m| m.files_expected.clone())
        .collect();
    state.owned_paths = supervisor_core::scope::normalize_owned_paths(&declared);
    state.milestones = plan.milestones;
    state.milestone_index = 0;
    state = update_phase(state, Phase::Implement, Utc::now());
    Ok(state)
}
