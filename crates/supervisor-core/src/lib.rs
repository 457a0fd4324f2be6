//! Data types and pure logic shared by the supervisor engine and CLI.
//!
//! Nothing in this crate touches the filesystem, spawns a process, or
//! calls a clock other than through an explicit `DateTime<Utc>`
//! parameter, so it can be exhaustively unit-tested.

pub mod collision;
pub mod config;
pub mod diagnosis;
pub mod events;
pub mod naming;
pub mod scope;
pub mod state_machine;
pub mod types;
pub mod verify_policy;
pub mod worker_protocol;

pub use config::{Config, ConfigError};
pub use events::{Event, EventPayload, EventType};
pub use types::{
    CommandResult, Milestone, Phase, Receipt, RiskLevel, RunId, RunState, ScopeLock, Tier,
    VerificationEvidence, VerifyResult, WorkerResult, WorkerStatus,
};
