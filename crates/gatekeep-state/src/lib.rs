//! gatekeep-state: persistence for the integration gate.
//!
//! Everything the gate records is append-only:
//!
//! - `ValidationRun`: one pipeline execution for a (source ref, unit) pair
//! - `RevertRecord`: one applied revert of an integration-branch commit
//!
//! ## Key Components
//!
//! - `ValidationLedger` / `RevertLedger`: backend-agnostic async traits
//! - `MemoryGateLedger`: in-memory fake used by tests and dry runs
//! - `SurrealGateLedger`: SurrealDB backend (`mem://` or `surrealkv://`)

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::StorageError;
pub use fakes::MemoryGateLedger;
pub use storage_traits::{
    CheckKind, CheckResult, CheckStatus, ContentDigest, RevertLedger, RevertRecord, RunId,
    StorageResult, ValidationLedger, ValidationRun, latest_per_unit,
};
pub use surreal_ledger::SurrealGateLedger;
