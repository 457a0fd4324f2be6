//! FINALIZE phase: write the terminal receipt and its diff artifacts.
//! `Finalize` is a fixed point in `Phase::next`, so this handler is only
//! ever entered once per run; re-ticking a finalized run is a no-op at
//! the supervisor loop level, not here.

use supervisor_core::types::{Receipt, RunState, Tier};

use crate::git::{Git, GitError};
use crate::receipt::{ReceiptError, ReceiptWriter};

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

pub fn run(
    state: &RunState,
    git: &Git,
    base_branch: &str,
    writer: &ReceiptWriter,
    verification_tier: Option<Tier>,
) -> Result<Receipt, FinalizeError> {
    let files = git.diff_name_only(base_branch)?;
    let patch = git.diff_patch(base_branch)?;
    let diffstat = git.diffstat(base_branch)?;
    let base_sha = git.rev_parse(base_branch)?;

    let artifacts = writer.write_diff_artifacts(&patch, &diffstat, &files)?;

    let receipt = writer.write_receipt(
        state.run_id.clone(),
        Some(base_sha),
        state.checkpoint_commit_sha.clone(),
        verification_tier,
        "finalized",
        &files,
        &diffstat,
        artifacts,
    )?;
    Ok(receipt)
}
