//! Tiered verification policy: which tiers to run for a given milestone,
//! and whether a tier's required commands were actually exercised.

use crate::types::{Milestone, RiskLevel, Tier, VerificationEvidence};

/// A single named risk trigger from the policy's `risk_triggers[]` list,
/// already evaluated against the current change set (§4.6). `tier` is the
/// tier the trigger escalates to when it fires; mid-run a `tier2` trigger
/// is demoted to `tier1` (only `is_run_end` lets a trigger reach tier2).
#[derive(Debug, Clone)]
pub struct RiskTrigger {
    pub name: String,
    pub tier: Tier,
    pub fired: bool,
}

/// The parts of `VerificationContext` (§4.6) that aren't already captured
/// by the milestone or the risk triggers themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationContext {
    pub is_milestone_end: bool,
    pub is_run_end: bool,
}

/// Choose the ordered set of verification tiers for a milestone, plus the
/// named reason each tier was added for. `tier0` is always present.
/// Escalation only ever adds tiers; nothing here downgrades below a tier
/// already selected.
pub fn select_tier(
    milestone: &Milestone,
    context: &VerificationContext,
    risk_triggers: &[RiskTrigger],
) -> (Vec<Tier>, Vec<String>) {
    let mut tiers = vec![Tier::Tier0];
    let mut reasons = vec!["tier0_always".to_string()];

    let mut add_tier = |tier: Tier, tiers: &mut Vec<Tier>| {
        if !tiers.contains(&tier) {
            tiers.push(tier);
        }
    };

    for trigger in risk_triggers {
        if !trigger.fired {
            continue;
        }
        let effective_tier = if trigger.tier == Tier::Tier2 && !context.is_run_end {
            Tier::Tier1
        } else {
            trigger.tier
        };
        add_tier(effective_tier, &mut tiers);
        reasons.push(format!("risk_trigger:{}", trigger.name));
    }

    if context.is_milestone_end {
        add_tier(Tier::Tier1, &mut tiers);
        reasons.push("milestone_end".to_string());
    }

    if milestone.risk_level == RiskLevel::High {
        add_tier(Tier::Tier1, &mut tiers);
        reasons.push("risk_level_high".to_string());
    }

    if context.is_run_end {
        add_tier(Tier::Tier2, &mut tiers);
        reasons.push("run_end".to_string());
    }

    tiers.sort();
    (tiers, reasons)
}

/// Build the evidence record for a set of commands that were actually
/// run, cross-checked against what the selected tiers required.
pub fn build_evidence(
    required: &[String],
    run: &[String],
    tiers_run: &[Tier],
) -> VerificationEvidence {
    let missing: Vec<String> = required
        .iter()
        .filter(|cmd| !run.contains(cmd))
        .cloned()
        .collect();
    VerificationEvidence {
        commands_required: required.to_vec(),
        commands_run: run.to_vec(),
        commands_missing: missing,
        tiers_run: tiers_run.to_vec(),
    }
}

impl VerificationEvidence {
    pub fn is_complete(&self) -> bool {
        self.commands_missing.is_empty()
    }
}
