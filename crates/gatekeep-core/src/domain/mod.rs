//! Domain models for gatekeep.
//!
//! Canonical definitions for the core entities:
//! - `Unit`: statically configured, independently validated subtree
//! - `ChangeRequest`: proposed change set targeting the integration branch
//! - `GateEvent`: trigger inputs from the CI platform

pub mod change_request;
pub mod error;
pub mod event;
pub mod unit;

pub use change_request::{ChangeRequest, ValidationStatus};
pub use error::{GateError, Result};
pub use event::{ChangeRequestEvent, GateEvent, ManualDispatchEvent, PushEvent};
pub use unit::{normalize_path, Unit};
