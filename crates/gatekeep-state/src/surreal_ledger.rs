//! SurrealDB-backed ledger implementation
//!
//! Uses `schema::ValidationRunRow` and `schema::RevertRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{RevertRow, TriggerRow, ValidationRunRow};
use crate::storage_traits::{
    RevertLedger, RevertRecord, StorageResult, ValidationLedger, ValidationRun,
};

/// Default on-disk location used by [`SurrealGateLedger::connect_default`].
pub const DEFAULT_DB_PATH: &str = ".gatekeep/db";

/// Attempts at claiming the next generation before giving up.
const MAX_TRIGGER_ATTEMPTS: usize = 8;

#[derive(Debug, Deserialize)]
struct GenerationOnly {
    generation: u64,
}

/// SurrealDB-backed implementation of [`ValidationLedger`] and [`RevertLedger`].
pub struct SurrealGateLedger {
    db: Surreal<Any>,
}

impl SurrealGateLedger {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `gatekeep/main`, and runs `init_schema`.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("failed to connect to {url}: {e}")))?;

        db.use_ns("gatekeep")
            .use_db("main")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %url, "SurrealGateLedger connected");
        Ok(Self { db })
    }

    /// Connect using `SURREALDB_URL`, falling back to local persistence in
    /// [`DEFAULT_DB_PATH`].
    pub async fn connect_default() -> StorageResult<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        std::fs::create_dir_all(DEFAULT_DB_PATH).map_err(|e| {
            StorageError::Connection(format!(
                "failed to create database directory {DEFAULT_DB_PATH}: {e}"
            ))
        })?;
        Self::connect(&format!("surrealkv://{DEFAULT_DB_PATH}")).await
    }

    async fn run_exists(&self, run_id: &str) -> StorageResult<bool> {
        let rid = run_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM validation_runs WHERE run_id = $rid")
            .bind(("rid", rid))
            .await?;
        let rows: Vec<ValidationRunRow> = res.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn revert_exists(&self, revert_id: &str) -> StorageResult<bool> {
        let rid = revert_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM reverts WHERE revert_id = $rid")
            .bind(("rid", rid))
            .await?;
        let rows: Vec<RevertRow> = res.take(0)?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl ValidationLedger for SurrealGateLedger {
    async fn begin_trigger(&self, source_ref: &str) -> StorageResult<u64> {
        let mut last_error = None;
        for _ in 0..MAX_TRIGGER_ATTEMPTS {
            let next = self.current_generation(source_ref).await?.unwrap_or(0) + 1;
            let created: Result<Option<TriggerRow>, surrealdb::Error> = self
                .db
                .create("triggers")
                .content(TriggerRow::new(source_ref, next))
                .await;
            match created {
                Ok(_) => {
                    debug!(source_ref, generation = next, "trigger registered");
                    return Ok(next);
                }
                // another writer claimed `next` first
                Err(err) => {
                    debug!(source_ref, generation = next, error = %err, "generation taken, retrying");
                    last_error = Some(err);
                }
            }
        }
        Err(StorageError::Backend(format!(
            "could not allocate a generation for {source_ref}: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn current_generation(&self, source_ref: &str) -> StorageResult<Option<u64>> {
        let sr = source_ref.to_string();
        let mut res = self
            .db
            .query(
                "SELECT generation FROM triggers WHERE source_ref = $sr \
                 ORDER BY generation DESC LIMIT 1",
            )
            .bind(("sr", sr))
            .await?;
        let rows: Vec<GenerationOnly> = res.take(0)?;
        Ok(rows.first().map(|r| r.generation))
    }

    async fn append_run(&self, run: ValidationRun) -> StorageResult<()> {
        if self.run_exists(&run.run_id.0).await? {
            return Err(StorageError::DuplicateRun {
                run_id: run.run_id.0,
            });
        }

        debug!(run_id = %run.run_id, unit = %run.unit, "appending validation run");
        let row = ValidationRunRow::from(run);
        let _created: Option<ValidationRunRow> =
            self.db.create("validation_runs").content(row).await?;
        Ok(())
    }

    async fn runs_for_source(&self, source_ref: &str) -> StorageResult<Vec<ValidationRun>> {
        let sr = source_ref.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM validation_runs WHERE source_ref = $sr ORDER BY recorded_at ASC")
            .bind(("sr", sr))
            .await?;
        let rows: Vec<ValidationRunRow> = res.take(0)?;
        rows.into_iter().map(ValidationRun::try_from).collect()
    }
}

#[async_trait]
impl RevertLedger for SurrealGateLedger {
    async fn record_revert(&self, record: RevertRecord) -> StorageResult<()> {
        if self.revert_exists(&record.revert_id).await? {
            return Err(StorageError::DuplicateRevert {
                revert_id: record.revert_id,
            });
        }

        debug!(revert_id = %record.revert_id, "recording revert");
        let row = RevertRow::from(record);
        let _created: Option<RevertRow> = self.db.create("reverts").content(row).await?;
        Ok(())
    }

    async fn list_reverts(&self) -> StorageResult<Vec<RevertRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM reverts ORDER BY created_at ASC")
            .await?;
        let rows: Vec<RevertRow> = res.take(0)?;
        Ok(rows.into_iter().map(RevertRecord::from).collect())
    }
}
