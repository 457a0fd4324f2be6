//! Runtime machinery that drives a run: durable storage, the git facade,
//! worker subprocess adapters, verification execution, the supervisor
//! tick loop, the auto-resume watcher, and the submit/receipt pipelines.

pub mod git;
pub mod handlers;
pub mod receipt;
pub mod run_store;
pub mod submit;
pub mod supervisor;
pub mod verify_engine;
pub mod watcher;
pub mod worker;

pub use git::Git;
pub use run_store::RunStore;
pub use supervisor::{Supervisor, SupervisorError, TickResult};
