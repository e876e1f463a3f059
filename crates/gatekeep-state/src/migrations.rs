//! SurrealDB schema initialization
//!
//! Every table is append-only: `update` and `delete` permissions are `NONE`.
//! Definitions use `IF NOT EXISTS` so an existing database can be reopened.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all gatekeep tables.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing gatekeep SurrealDB schema");

    init_validation_runs_table(db).await?;
    init_reverts_table(db).await?;
    init_triggers_table(db).await?;

    info!("gatekeep schema initialization complete");
    Ok(())
}

/// Initialize `validation_runs`
///
/// Schema:
/// ```text
/// TABLE validation_runs {
///   run_id:       STRING (unique)
///   source_ref:   STRING (indexed)
///   commit:       STRING
///   unit:         STRING
///   generation:   INT
///   checks:       ARRAY<OBJECT>
///   passed:       BOOL
///   plan_digest:  STRING
///   recorded_at:  DATETIME
/// }
/// ```
///
/// Rows are keyed logically by (source_ref, unit, recorded_at); `run_id`
/// disambiguates runs that land in the same instant.
async fn init_validation_runs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing validation_runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS validation_runs
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_vr_run_id ON TABLE validation_runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_vr_source ON TABLE validation_runs COLUMNS source_ref;
        DEFINE INDEX IF NOT EXISTS idx_vr_key ON TABLE validation_runs COLUMNS source_ref, unit, recorded_at;
    "#;

    db.query(sql).await?.check()?;
    info!("validation_runs table initialized");
    Ok(())
}

/// Initialize `reverts`
async fn init_reverts_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing reverts table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS reverts
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_revert_id ON TABLE reverts COLUMNS revert_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_revert_target ON TABLE reverts COLUMNS target_commit;
    "#;

    db.query(sql).await?.check()?;
    info!("reverts table initialized");
    Ok(())
}

/// Initialize `triggers`
///
/// The unique (source_ref, generation) index makes two writers racing for
/// the same generation fail instead of both succeeding.
async fn init_triggers_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing triggers table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS triggers
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_trigger_gen ON TABLE triggers COLUMNS source_ref, generation UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("triggers table initialized");
    Ok(())
}
