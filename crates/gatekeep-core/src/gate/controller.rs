//! Gate controller: turns triggers into validations, decisions, state
//! transitions, fast-forwards and status messages.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use gatekeep_state::{ValidationLedger, ValidationRun};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn, Span};

use crate::concurrency::{BranchLocks, SupersessionRegistry};
use crate::config::GateConfig;
use crate::detect::ChangeDetector;
use crate::domain::change_request::{ChangeRequest, ValidationStatus};
use crate::domain::error::{GateError, Result};
use crate::domain::event::{ChangeRequestEvent, PushEvent};
use crate::gate::decision::GateDecision;
use crate::gate::state::{transition, Flow, GateState, GateTrigger};
use crate::git::GitRepo;
use crate::metrics::METRICS;
use crate::notify::{NotificationStatus, Notifier};
use crate::obs;
use crate::reporting::render_status_md;
use crate::validate::{UnitValidator, ValidationTarget};

/// A completed stable-branch fast-forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardResult {
    pub branch: String,
    pub from: String,
    pub to: String,
    /// Whether the new head was pushed to the configured remote.
    pub pushed: bool,
}

/// Everything that happened while handling one trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub source_ref: String,
    pub head: String,
    pub generation: u64,
    pub affected_units: BTreeSet<String>,
    /// Runs produced by this trigger (already appended to the ledger).
    pub runs: Vec<ValidationRun>,
    pub decision: GateDecision,
    pub state: GateState,
    /// A newer trigger for the same source ref started while this one ran.
    /// Superseded outcomes never gate.
    pub superseded: bool,
    pub fast_forward: Option<FastForwardResult>,
    pub notification: NotificationStatus,
}

#[derive(Debug, Clone)]
struct TrackedState {
    head: String,
    generation: u64,
    state: GateState,
}

/// Drives the gate for change requests and the integration branch.
pub struct GateController {
    config: Arc<GateConfig>,
    repo: GitRepo,
    detector: ChangeDetector,
    validator: Arc<dyn UnitValidator>,
    ledger: Arc<dyn ValidationLedger>,
    notifier: Notifier,
    supersession: SupersessionRegistry,
    locks: BranchLocks,
    states: Mutex<HashMap<String, TrackedState>>,
    change_requests: Mutex<HashMap<u64, ChangeRequest>>,
}

impl GateController {
    pub fn new(
        config: Arc<GateConfig>,
        repo: GitRepo,
        validator: Arc<dyn UnitValidator>,
        ledger: Arc<dyn ValidationLedger>,
        notifier: Notifier,
    ) -> Result<Self> {
        let detector = ChangeDetector::new(config.units.clone(), &config.global_patterns)?;
        Ok(Self {
            config,
            repo,
            detector,
            validator,
            ledger,
            notifier,
            supersession: SupersessionRegistry::new(),
            locks: BranchLocks::new(),
            states: Mutex::new(HashMap::new()),
            change_requests: Mutex::new(HashMap::new()),
        })
    }

    /// Share branch locks with other ref writers (the revert controller).
    pub fn with_locks(mut self, locks: BranchLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Current state for a source ref, if it has been seen.
    pub fn state(&self, source_ref: &str) -> Option<GateState> {
        self.lock_states().get(source_ref).map(|t| t.state)
    }

    pub fn change_request(&self, id: u64) -> Option<ChangeRequest> {
        self.lock_change_requests().get(&id).cloned()
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_change_requests(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ChangeRequest>> {
        self.change_requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate a change request's head and report on it.
    ///
    /// The gate only unblocks a change request; merging stays a human action
    /// recorded through [`GateController::record_merge`].
    #[instrument(
        skip(self, event),
        fields(change_request = event.id, source_ref = %event.source_ref, generation)
    )]
    pub async fn handle_change_request(&self, event: ChangeRequestEvent) -> Result<GateOutcome> {
        let target = event
            .target_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&event.target_ref);
        if target != self.config.integration_branch {
            return Err(GateError::InvalidEvent(format!(
                "change request {} targets '{target}', expected '{}'",
                event.id, self.config.integration_branch
            )));
        }

        let source_ref = event.source_ref.clone();
        let generation = self.begin_trigger(&source_ref).await?;
        Span::current().record("generation", generation);

        let paths = match event.changed_paths {
            Some(paths) => paths,
            None => {
                self.repo
                    .changed_paths(&self.config.integration_branch, &event.head_commit)
                    .await?
            }
        };
        let affected = self.detector.affected(&paths);
        info!(change_request = event.id, units = ?affected, "change request affects units");

        let mut cr = self
            .lock_change_requests()
            .get(&event.id)
            .cloned()
            .unwrap_or_else(|| {
                ChangeRequest::new(event.id, &source_ref, target, &event.head_commit)
            });
        cr.source_ref = source_ref.clone();
        cr.head_commit = event.head_commit.clone();
        cr.affected_units = affected.clone();
        cr.status = ValidationStatus::Pending;
        self.lock_change_requests().insert(cr.id, cr.clone());

        let mut outcome = self
            .run_gate(
                Flow::ChangeRequest,
                GateTrigger::Submitted,
                &source_ref,
                &event.head_commit,
                generation,
                affected,
            )
            .await?;

        if outcome.superseded {
            return Ok(outcome);
        }
        if !self.is_current(&source_ref, generation).await? {
            info!("superseded before reporting, leaving the status message alone");
            outcome.superseded = true;
            return Ok(outcome);
        }

        cr.status = if outcome.decision.is_allow() {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };
        let body = render_status_md(&outcome.head, outcome.state, &outcome.decision, &outcome.runs);
        outcome.notification = self.notifier.post_or_update(&mut cr, &body).await;
        self.lock_change_requests().insert(cr.id, cr);

        Ok(outcome)
    }

    /// Validate the integration branch head and, when it passes,
    /// fast-forward the stable branch to it.
    #[instrument(skip(self, event), fields(branch = %event.branch(), generation))]
    pub async fn handle_push(&self, event: PushEvent) -> Result<GateOutcome> {
        let branch = event.branch().to_string();
        if branch != self.config.integration_branch {
            return Err(GateError::InvalidEvent(format!(
                "push to '{branch}' is not gated (integration branch is '{}')",
                self.config.integration_branch
            )));
        }

        if let Some(remote) = &self.config.remote {
            self.repo.sync_branch(remote, &self.config.integration_branch).await?;
            self.repo.sync_branch(remote, &self.config.stable_branch).await?;
        }

        let head = self.repo.resolve(&event.after).await?;
        let generation = self.begin_trigger(&branch).await?;
        Span::current().record("generation", generation);

        let paths = self
            .repo
            .changed_paths(&self.config.stable_branch, &head)
            .await?;
        let affected = self.detector.affected(&paths);
        info!(branch = %branch, units = ?affected, "integration push affects units");

        let mut outcome = self
            .run_gate(
                Flow::IntegrationBranch,
                GateTrigger::Pushed,
                &branch,
                &head,
                generation,
                affected,
            )
            .await?;

        if outcome.superseded || !outcome.decision.is_allow() {
            return Ok(outcome);
        }
        if !self.is_current(&branch, generation).await? {
            info!("superseded before fast-forward");
            outcome.superseded = true;
            return Ok(outcome);
        }

        let ff = self.fast_forward(&head).await?;
        if self.is_current(&branch, generation).await? {
            outcome.state = self.advance(
                &branch,
                &head,
                generation,
                Flow::IntegrationBranch,
                GateTrigger::FastForwardApplied,
            )?;
        }
        outcome.fast_forward = Some(ff);
        Ok(outcome)
    }

    /// Record the human merge of a change request whose gate passed.
    pub fn record_merge(&self, change_request: u64) -> Result<GateState> {
        let cr = self.change_request(change_request).ok_or_else(|| {
            GateError::InvalidEvent(format!("unknown change request {change_request}"))
        })?;
        let tracked = self
            .lock_states()
            .get(&cr.source_ref)
            .cloned()
            .ok_or_else(|| {
                GateError::InvalidEvent(format!("change request {change_request} was never gated"))
            })?;
        self.advance(
            &cr.source_ref,
            &tracked.head,
            tracked.generation,
            Flow::ChangeRequest,
            GateTrigger::HumanMerged,
        )
    }

    /// Take the next generation for `source_ref` from the ledger, which is
    /// shared by every gate process.
    async fn begin_trigger(&self, source_ref: &str) -> Result<u64> {
        let generation = self.ledger.begin_trigger(source_ref).await?;
        self.supersession.observe(source_ref, generation);
        Ok(generation)
    }

    /// Whether no newer trigger for `source_ref` has started, here or in
    /// another process sharing the ledger.
    async fn is_current(&self, source_ref: &str, generation: u64) -> Result<bool> {
        if !self.supersession.is_current(source_ref, generation) {
            return Ok(false);
        }
        match self.ledger.current_generation(source_ref).await? {
            Some(latest) if latest > generation => {
                self.supersession.observe(source_ref, latest);
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Shared validate → record → decide → transition path.
    async fn run_gate(
        &self,
        flow: Flow,
        trigger: GateTrigger,
        source_ref: &str,
        head: &str,
        generation: u64,
        affected: BTreeSet<String>,
    ) -> Result<GateOutcome> {
        self.advance(source_ref, head, generation, flow, trigger)?;

        let target = ValidationTarget::new(source_ref, head, generation);
        let runs = self.validate_units(&affected, &target).await?;

        if !self.is_current(source_ref, generation).await? {
            info!(source_ref, generation, "superseded by a newer trigger, not gating");
            let decision = GateDecision::evaluate(&affected, &runs, head);
            return Ok(GateOutcome {
                source_ref: source_ref.to_string(),
                head: head.to_string(),
                generation,
                affected_units: affected,
                runs,
                decision,
                state: self.state(source_ref).unwrap_or(GateState::Validating),
                superseded: true,
                fast_forward: None,
                notification: NotificationStatus::Skipped,
            });
        }

        let latest = self.ledger.latest_runs(source_ref).await?;
        let decision = GateDecision::evaluate(&affected, &latest, head);
        let result = if decision.is_allow() {
            GateTrigger::ValidationPassed
        } else {
            GateTrigger::ValidationFailed
        };
        let state = self.advance(source_ref, head, generation, flow, result)?;

        Ok(GateOutcome {
            source_ref: source_ref.to_string(),
            head: head.to_string(),
            generation,
            affected_units: affected,
            runs,
            decision,
            state,
            superseded: false,
            fast_forward: None,
            notification: NotificationStatus::Skipped,
        })
    }

    /// Validate every affected unit concurrently and append each run.
    async fn validate_units(
        &self,
        affected: &BTreeSet<String>,
        target: &ValidationTarget,
    ) -> Result<Vec<ValidationRun>> {
        let jobs = affected.iter().filter_map(|name| {
            let unit = self.detector.unit(name)?;
            Some(async move { self.validator.validate(unit, target).await })
        });
        let results = join_all(jobs).await;

        let mut runs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(run) => {
                    let duration_ms = run.checks.iter().map(|c| c.duration_ms).sum();
                    obs::emit_validation_finished(
                        &run.source_ref,
                        &run.unit,
                        &run.commit,
                        run.passed,
                        duration_ms,
                    );
                    METRICS.inc_validations();
                    self.ledger.append_run(run.clone()).await?;
                    runs.push(run);
                }
                Err(err) => {
                    warn!(error = %err, "unit validation could not run");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(runs),
        }
    }

    /// Apply a transition for `source_ref` at `head`.
    ///
    /// A different head, or a terminal state, restarts from `Pending`.
    /// Triggers from an older generation leave the stored state alone.
    fn advance(
        &self,
        source_ref: &str,
        head: &str,
        generation: u64,
        flow: Flow,
        trigger: GateTrigger,
    ) -> Result<GateState> {
        let mut states = self.lock_states();
        let current = match states.get(source_ref) {
            Some(t) if t.generation > generation => return Ok(t.state),
            Some(t) if t.head == head && !t.state.is_terminal() => t.state,
            _ => GateState::Pending,
        };

        let next = transition(current, flow, trigger)?;
        obs::emit_transition(source_ref, current.as_str(), next.as_str(), trigger.as_str());
        states.insert(
            source_ref.to_string(),
            TrackedState {
                head: head.to_string(),
                generation,
                state: next,
            },
        );
        Ok(next)
    }

    /// Move the stable branch to `head`.
    ///
    /// Holds both branch locks and re-checks ancestry after acquiring them:
    /// `head` must be on the integration branch and descend from the stable
    /// head. The remote is pushed (never forced) before the local ref moves
    /// by compare-and-swap, so a rejected push leaves both untouched.
    pub async fn fast_forward(&self, head: &str) -> Result<FastForwardResult> {
        let stable = self.config.stable_branch.as_str();
        let integration = self.config.integration_branch.as_str();
        let _guard = self.locks.lock_many(&[stable, integration]).await;

        let conflict = |from: &str, to: &str| GateError::FastForwardConflict {
            branch: stable.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        };

        let integration_head = self.repo.branch_head(integration).await?;
        if !self.repo.is_ancestor(head, &integration_head).await? {
            warn!(head, integration_head = %integration_head, "head is not on the integration branch, refusing");
            return Err(conflict(head, &integration_head));
        }

        let stable_head = self.repo.branch_head(stable).await?;
        if self.repo.is_ancestor(head, &stable_head).await? {
            debug!(head, stable_head = %stable_head, "stable already contains head");
            return Ok(FastForwardResult {
                branch: stable.to_string(),
                from: stable_head.clone(),
                to: stable_head,
                pushed: false,
            });
        }

        if !self.repo.is_ancestor(&stable_head, head).await? {
            warn!(stable_head = %stable_head, head, "stable head is not an ancestor, refusing");
            return Err(conflict(&stable_head, head));
        }

        let pushed = match &self.config.remote {
            Some(remote) => {
                self.repo.push(remote, head, stable).await?;
                true
            }
            None => false,
        };

        if let Err(err) = self.repo.update_branch(stable, head, &stable_head).await {
            warn!(error = %err, "stable branch moved during fast-forward");
            return Err(conflict(&stable_head, head));
        }

        METRICS.inc_fast_forwards();
        obs::emit_fast_forward(stable, &stable_head, head);
        Ok(FastForwardResult {
            branch: stable.to_string(),
            from: stable_head,
            to: head.to_string(),
            pushed,
        })
    }
}
