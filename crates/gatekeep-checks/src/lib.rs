//! gatekeep-checks: the per-unit validation pipeline.
//!
//! Provides:
//! - `Check` / `CommandCheck`: one check invocation with a wall-clock timeout
//! - `CheckPlan`: the fixed lint → format → type-check → build → test order
//!   with early exit and a deterministic plan digest
//! - `ValidationRunner`: `UnitValidator` that runs a plan in a detached
//!   worktree per unit

pub mod check;
pub mod pipeline;
pub mod plan;
pub mod runner;

pub use check::{Check, CheckSpec, CommandCheck};
pub use pipeline::ValidationRunner;
pub use plan::CheckPlan;
pub use runner::{CheckRunner, MAX_DIAGNOSTIC_BYTES};
