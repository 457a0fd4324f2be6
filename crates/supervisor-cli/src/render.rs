//! Human-readable rendering of run state, status, and diagnosis for the
//! terminal. Kept deliberately thin — this crate is a thin wrapper over
//! `supervisor-engine`, not a product surface in its own right.

use supervisor_core::types::{Phase, RunState, StopDiagnosis};

pub fn render_status(state: &RunState) -> String {
    let mut out = String::new();
    out.push_str(&format!("run:        {}\n", state.run_id));
    out.push_str(&format!("phase:      {}\n", state.phase.as_str()));
    out.push_str(&format!(
        "milestone:  {}/{}\n",
        state.milestone_index.min(state.milestones.len()),
        state.milestones.len()
    ));
    out.push_str(&format!("updated at: {}\n", state.updated_at.to_rfc3339()));
    if let Some(reason) = &state.stop_reason {
        out.push_str(&format!("stopped:    {reason}\n"));
    }
    out
}

pub fn render_diagnosis(diagnosis: &StopDiagnosis) -> String {
    let mut out = String::new();
    out.push_str(&format!("outcome:     {}\n", diagnosis.outcome));
    out.push_str(&format!("reason:      {}\n", diagnosis.stop_reason));
    out.push_str(&format!("family:      {}\n", diagnosis.stop_reason_family));
    out.push_str(&format!("diagnosis:   {}\n", diagnosis.primary_diagnosis));
    out.push_str(&format!("confidence:  {:.2}\n", diagnosis.confidence));
    out.push_str("next actions:\n");
    for action in &diagnosis.next_actions {
        out.push_str(&format!("  - {action}\n"));
    }
    if let Some(cmd) = &diagnosis.resume_command {
        out.push_str(&format!("resume with: {cmd}\n"));
    }
    out
}

pub fn render_run_list(states: &[RunState]) -> String {
    let mut out = String::new();
    for state in states {
        let marker = if state.phase == Phase::Stopped { "!" } else { " " };
        out.push_str(&format!(
            "{marker} {:<16} {:<10} {}/{}\n",
            state.run_id,
            state.phase.as_str(),
            state.milestone_index,
            state.milestones.len()
        ));
    }
    out
}
