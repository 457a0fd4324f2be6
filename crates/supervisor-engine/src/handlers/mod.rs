//! One module per phase, dispatched from `supervisor::tick` via a match
//! on `RunState::phase` — a dispatch table rather than a trait hierarchy,
//! since phases don't share enough behavior to justify polymorphism.

pub mod checkpoint;
pub mod finalize;
pub mod implement;
pub mod plan;
pub mod review;
pub mod verify;
