//! gatekeep core library.
//!
//! Change detection, the promotion gate state machine, fast-forward and
//! revert control, and change-request notifications for a two-branch
//! (integration → stable) workflow.

pub mod concurrency;
pub mod config;
pub mod detect;
pub mod domain;
pub mod gate;
pub mod git;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod reporting;
pub mod revert;
pub mod telemetry;
pub mod validate;

pub use concurrency::{BranchGuard, BranchLocks, SupersessionRegistry};
pub use config::{AuthPolicy, CheckCommands, GateConfig, Identity, DEFAULT_CHECK_TIMEOUT_SECS};
pub use detect::{ChangeDetector, DetectError};
pub use domain::{
    normalize_path, ChangeRequest, ChangeRequestEvent, GateError, GateEvent, ManualDispatchEvent,
    PushEvent, Result, Unit, ValidationStatus,
};
pub use gate::{
    FastForwardResult, Flow, GateController, GateDecision, GateOutcome, GateState, GateTrigger,
};
pub use git::{GitRepo, Worktree};
pub use notify::{
    Forge, GitHubForge, MemoryForge, NotificationStatus, Notifier, OpenChangeRequest, STATUS_MARKER,
};
pub use revert::{Authorizer, DenyAll, PolicyAuthorizer, RevertController, RevertRequest};
pub use validate::{UnitValidator, ValidationTarget};

pub use gatekeep_state::{
    CheckKind, CheckResult, CheckStatus, ContentDigest, MemoryGateLedger, RevertLedger,
    RevertRecord, RunId, SurrealGateLedger, ValidationLedger, ValidationRun,
};
