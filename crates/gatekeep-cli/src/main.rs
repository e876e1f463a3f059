//! gatekeep: integration gate for a two-branch workflow.
//!
//! Changes land on the integration branch through validated change requests;
//! the stable branch only ever fast-forwards to a validated integration head.
//!
//! ## Commands
//!
//! - `detect`: list the units a set of paths affects
//! - `validate`: run the check pipeline for one unit
//! - `handle`: react to a CI event (change request, push, manual dispatch)
//! - `revert`: revert an integration-branch commit
//! - `runs`: list recorded validation runs

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use gatekeep_checks::{CheckPlan, ValidationRunner};
use gatekeep_core::metrics::METRICS;
use gatekeep_core::telemetry::init_tracing;
use gatekeep_core::{
    AuthPolicy, Authorizer, BranchLocks, ChangeDetector, DenyAll, Forge, GateConfig, GateController,
    GateDecision, GateEvent, GateOutcome, GitHubForge, GitRepo, MemoryForge, Notifier, PolicyAuthorizer,
    RevertController, RevertRecord, RevertRequest, UnitValidator, ValidationTarget,
};
use gatekeep_state::{
    CheckStatus, MemoryGateLedger, RevertLedger, SurrealGateLedger, ValidationLedger, ValidationRun,
};

#[derive(Parser)]
#[command(name = "gatekeep")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Integration gate: validate, fast-forward and revert", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Gate configuration file
    #[arg(short, long, global = true, env = "GATEKEEP_CONFIG", default_value = "gatekeep.toml")]
    config: PathBuf,

    /// Repository work tree
    #[arg(long, global = true, env = "GATEKEEP_REPO", default_value = ".")]
    repo: PathBuf,

    /// Ledger URL (`mem://`, `surrealkv://path`); defaults to `.gatekeep/db`
    #[arg(long, global = true, env = "SURREALDB_URL")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the units affected by a set of changed paths
    Detect {
        /// Changed paths, relative to the repository root
        #[arg(long, num_args = 1.., conflicts_with = "base")]
        paths: Vec<String>,

        /// Diff `base...head` instead of passing paths
        #[arg(long, requires = "head")]
        base: Option<String>,

        #[arg(long)]
        head: Option<String>,
    },

    /// Run the check pipeline for one unit
    Validate {
        /// Unit name from the configuration
        #[arg(long)]
        unit: String,

        /// Branch or change-request ref to validate
        #[arg(long)]
        source: String,
    },

    /// Handle a CI event given as a JSON file
    Handle {
        /// Event file (`{"event": "change_request" | "push" | "manual_dispatch", ...}`)
        #[arg(long)]
        event: PathBuf,

        /// Use in-memory ledger and forge and never push
        #[arg(long)]
        dry_run: bool,

        /// Authorization policy, required for manual_dispatch
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Revert a commit on the integration branch
    Revert {
        /// Why the commit is being reverted
        #[arg(long)]
        reason: String,

        /// Commit to revert (default: integration branch head)
        #[arg(long)]
        commit: Option<String>,

        /// Who is asking
        #[arg(long, env = "GITHUB_ACTOR")]
        actor: String,

        /// Authorization policy file (separate from the gate config)
        #[arg(long)]
        policy: PathBuf,

        /// Use in-memory ledger and forge and never push
        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded validation runs for a source ref
    Runs {
        #[arg(long)]
        source: String,

        /// Only the latest run per unit
        #[arg(long)]
        latest: bool,
    },
}

/// Ledger handles used by a command.
struct Ledgers {
    validation: Arc<dyn ValidationLedger>,
    revert: Arc<dyn RevertLedger>,
}

async fn open_ledgers(db: Option<&str>, dry_run: bool) -> Result<Ledgers> {
    if dry_run {
        let ledger = Arc::new(MemoryGateLedger::new());
        return Ok(Ledgers {
            validation: ledger.clone(),
            revert: ledger,
        });
    }
    let ledger = match db {
        Some(url) => SurrealGateLedger::connect(url).await,
        None => SurrealGateLedger::connect_default().await,
    }
    .context("Failed to open gatekeep ledger")?;
    let ledger = Arc::new(ledger);
    Ok(Ledgers {
        validation: ledger.clone(),
        revert: ledger,
    })
}

fn open_forge(dry_run: bool) -> Result<Arc<dyn Forge>> {
    if dry_run {
        return Ok(Arc::new(MemoryForge::new()));
    }
    match GitHubForge::from_env().context("Failed to configure GitHub client")? {
        Some(forge) => Ok(Arc::new(forge)),
        None => {
            warn!("GITHUB_TOKEN or GITHUB_REPOSITORY not set, notifications stay local");
            Ok(Arc::new(MemoryForge::new()))
        }
    }
}

fn load_config(path: &Path, dry_run: bool) -> Result<Arc<GateConfig>> {
    let mut config = GateConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    if dry_run {
        config.remote = None;
    }
    Ok(Arc::new(config))
}

fn load_authorizer(policy: Option<&Path>) -> Result<Arc<dyn Authorizer>> {
    match policy {
        Some(path) => {
            let policy = AuthPolicy::load(path)
                .with_context(|| format!("Failed to load policy {}", path.display()))?;
            Ok(Arc::new(PolicyAuthorizer::new(policy)))
        }
        None => Ok(Arc::new(DenyAll)),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let result = run(cli).await;
    METRICS.flush();
    result
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let repo = cli.repo.clone();
    let db = cli.db.clone();
    match cli.command {
        Commands::Detect { paths, base, head } => {
            cmd_detect(&cli.config, &repo, paths, base, head, cli.json).await
        }
        Commands::Validate { unit, source } => {
            cmd_validate(&cli.config, &repo, db.as_deref(), &unit, &source, cli.json).await
        }
        Commands::Handle {
            event,
            dry_run,
            policy,
        } => {
            cmd_handle(
                &cli.config,
                &repo,
                db.as_deref(),
                &event,
                dry_run,
                policy.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Revert {
            reason,
            commit,
            actor,
            policy,
            dry_run,
        } => {
            let request = RevertRequest {
                commit,
                reason,
                actor,
            };
            let ctx = Session::new(&cli.config, &repo, db.as_deref(), dry_run).await?;
            let record = ctx
                .revert_controller(Some(policy.as_path()))?
                .revert(request)
                .await?;
            print_revert(&record, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Runs { source, latest } => {
            cmd_runs(db.as_deref(), &source, latest, cli.json).await
        }
    }
}

/// Everything a gate or revert command needs.
struct Session {
    config: Arc<GateConfig>,
    git: GitRepo,
    ledgers: Ledgers,
    notifier: Notifier,
    locks: BranchLocks,
}

impl Session {
    async fn new(config: &Path, repo: &Path, db: Option<&str>, dry_run: bool) -> Result<Self> {
        let config = load_config(config, dry_run)?;
        let git = GitRepo::open(repo).with_identity(config.committer.clone());
        Ok(Self {
            ledgers: open_ledgers(db, dry_run).await?,
            notifier: Notifier::new(open_forge(dry_run)?),
            locks: BranchLocks::new(),
            config,
            git,
        })
    }

    fn gate_controller(&self) -> Result<GateController> {
        let validator = ValidationRunner::new(self.git.clone(), CheckPlan::from_config(&self.config));
        Ok(GateController::new(
            self.config.clone(),
            self.git.clone(),
            Arc::new(validator),
            self.ledgers.validation.clone(),
            self.notifier.clone(),
        )?
        .with_locks(self.locks.clone()))
    }

    fn revert_controller(&self, policy: Option<&Path>) -> Result<RevertController> {
        Ok(RevertController::new(
            self.config.clone(),
            self.git.clone(),
            self.ledgers.revert.clone(),
            self.notifier.clone(),
            load_authorizer(policy)?,
        )
        .with_locks(self.locks.clone()))
    }
}

async fn cmd_detect(
    config: &Path,
    repo: &Path,
    paths: Vec<String>,
    base: Option<String>,
    head: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config, true)?;
    let detector = ChangeDetector::new(config.units.clone(), &config.global_patterns)?;

    let paths = match (base, head) {
        (Some(base), Some(head)) => GitRepo::open(repo).changed_paths(&base, &head).await?,
        _ if paths.is_empty() => bail!("pass --paths or --base/--head"),
        _ => paths,
    };

    let affected = detector.affected(&paths);
    if json {
        print_json(&affected)?;
    } else if affected.is_empty() {
        println!("No units affected.");
    } else {
        for unit in &affected {
            println!("{unit}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_validate(
    config_path: &Path,
    repo: &Path,
    db: Option<&str>,
    unit_name: &str,
    source: &str,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config_path, false)?;
    let unit = config
        .unit(unit_name)
        .with_context(|| format!("Unknown unit '{unit_name}'"))?
        .clone();
    if !unit.enabled {
        bail!("Unit '{unit_name}' is disabled");
    }

    let git = GitRepo::open(repo).with_identity(config.committer.clone());
    let commit = git.resolve(source).await?;
    let runner = ValidationRunner::new(git, CheckPlan::from_config(&config));

    info!(unit = %unit.name, source, commit = %commit, "validating");
    // manual runs carry generation 0 so they never outrank a triggered run
    let run = runner
        .validate(&unit, &ValidationTarget::new(source, &commit, 0))
        .await?;

    let ledgers = open_ledgers(db, false).await?;
    ledgers.validation.append_run(run.clone()).await?;

    if json {
        print_json(&run)?;
    } else {
        print_run(&run);
    }
    Ok(if run.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_handle(
    config: &Path,
    repo: &Path,
    db: Option<&str>,
    event_path: &Path,
    dry_run: bool,
    policy: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(event_path)
        .with_context(|| format!("Failed to read event {}", event_path.display()))?;
    let event = GateEvent::from_json(&raw).context("Invalid event")?;
    let ctx = Session::new(config, repo, db, dry_run).await?;

    match event {
        GateEvent::ChangeRequest(cr) => {
            let outcome = ctx.gate_controller()?.handle_change_request(cr).await?;
            print_outcome(&outcome, json)?;
            Ok(exit_for(&outcome))
        }
        GateEvent::Push(push) => {
            let outcome = ctx.gate_controller()?.handle_push(push).await?;
            print_outcome(&outcome, json)?;
            Ok(exit_for(&outcome))
        }
        GateEvent::ManualDispatch(dispatch) => {
            let record = ctx
                .revert_controller(policy)?
                .revert(RevertRequest {
                    commit: dispatch.commit,
                    reason: dispatch.reason,
                    actor: dispatch.actor,
                })
                .await?;
            print_revert(&record, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_runs(db: Option<&str>, source: &str, latest: bool, json: bool) -> Result<ExitCode> {
    let ledgers = open_ledgers(db, false).await?;
    let runs = if latest {
        ledgers.validation.latest_runs(source).await?
    } else {
        ledgers.validation.runs_for_source(source).await?
    };

    if json {
        print_json(&runs)?;
    } else if runs.is_empty() {
        println!("No runs recorded for {source}");
    } else {
        for run in &runs {
            print_run(run);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_for(outcome: &GateOutcome) -> ExitCode {
    if outcome.superseded || outcome.decision.is_allow() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_run(run: &ValidationRun) {
    let status = if run.passed { "✓ PASSED" } else { "✗ FAILED" };
    println!(
        "{} {} @ {} (gen {}, {})",
        status,
        run.unit,
        &run.commit[..run.commit.len().min(12)],
        run.generation,
        run.recorded_at.to_rfc3339()
    );
    for check in &run.checks {
        let mark = match check.status {
            CheckStatus::Passed => "✓",
            CheckStatus::Skipped => "-",
            _ => "✗",
        };
        println!("  {} {} ({}ms)", mark, check.kind, check.duration_ms);
    }
}

fn print_outcome(outcome: &GateOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    println!("Source: {} @ {}", outcome.source_ref, outcome.head);
    println!("Generation: {}", outcome.generation);
    if outcome.superseded {
        println!("Superseded by a newer trigger; result not used for gating.");
    }
    if outcome.affected_units.is_empty() {
        println!("No units affected.");
    }
    for run in &outcome.runs {
        print_run(run);
    }
    println!("State: {}", outcome.state);
    match &outcome.decision {
        GateDecision::Allow => println!("Gate: ✓ ALLOW"),
        GateDecision::Block { failing_units } => {
            println!("Gate: ✗ BLOCK ({})", failing_units.join(", "))
        }
    }
    if let Some(ff) = &outcome.fast_forward {
        println!(
            "Fast-forward: {} {} -> {}{}",
            ff.branch,
            ff.from,
            ff.to,
            if ff.pushed { " (pushed)" } else { "" }
        );
    }
    if outcome.notification.is_degraded() {
        println!("Notification: degraded");
    }
    Ok(())
}

fn print_revert(record: &RevertRecord, json: bool) -> Result<()> {
    if json {
        return print_json(record);
    }
    println!("Reverted {} with {}", record.target_commit, record.revert_commit);
    if let Some(parent) = record.mainline_parent {
        println!("Merge commit reverted against parent {parent}");
    }
    match record.tracking_issue {
        Some(issue) => println!("Tracking issue: #{issue}"),
        None => println!("Tracking issue: not created"),
    }
    if !record.notified_change_requests.is_empty() {
        let ids: Vec<String> = record
            .notified_change_requests
            .iter()
            .map(|id| format!("#{id}"))
            .collect();
        println!("Notified: {}", ids.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const CONFIG: &str = r#"
        global_patterns = ["package.json"]
        [[units]]
        name = "kit-a"
        paths = ["kit-a"]
        [[units]]
        name = "kit-b"
        paths = ["kit-b"]
    "#;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_handle_with_dry_run() {
        let cli = Cli::try_parse_from([
            "gatekeep",
            "--config",
            "ci/gatekeep.toml",
            "handle",
            "--event",
            "event.json",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("ci/gatekeep.toml"));
        assert!(matches!(cli.command, Commands::Handle { dry_run: true, .. }));
    }

    #[test]
    fn revert_requires_policy() {
        let err = Cli::try_parse_from([
            "gatekeep", "revert", "--reason", "broken", "--actor", "ops",
        ]);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn detect_accepts_explicit_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gatekeep.toml");
        std::fs::write(&config, CONFIG).unwrap();

        let code = cmd_detect(
            &config,
            dir.path(),
            vec!["kit-a/app.tsx".to_string()],
            None,
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[tokio::test]
    async fn detect_without_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gatekeep.toml");
        std::fs::write(&config, CONFIG).unwrap();

        let err = cmd_detect(&config, dir.path(), Vec::new(), None, None, false)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("--paths"));
    }

    #[tokio::test]
    async fn dry_run_change_request_uses_memory_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gatekeep.toml");
        std::fs::write(&config, CONFIG).unwrap();
        let event = dir.path().join("event.json");
        std::fs::write(
            &event,
            r#"{"event":"change_request","id":1,"source_ref":"refs/pull/1/head",
                "target_ref":"dmz","head_commit":"abcdef1","changed_paths":["README.md"]}"#,
        )
        .unwrap();

        // README touches no unit, so nothing runs and the gate passes
        let code = cmd_handle(&config, dir.path(), None, &event, true, None, true)
            .await
            .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[tokio::test]
    async fn manual_dispatch_without_policy_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gatekeep.toml");
        std::fs::write(&config, CONFIG).unwrap();
        let event = dir.path().join("event.json");
        std::fs::write(
            &event,
            r#"{"event":"manual_dispatch","reason":"broken","actor":"ops"}"#,
        )
        .unwrap();

        let err = cmd_handle(&config, dir.path(), None, &event, true, None, false)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("not authorized"));
    }
}
