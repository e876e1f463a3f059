//! Promotion gate: state machine, decisions and the controller driving them.

pub mod controller;
pub mod decision;
pub mod state;

pub use controller::{FastForwardResult, GateController, GateOutcome};
pub use decision::GateDecision;
pub use state::{transition, Flow, GateState, GateTrigger};
