//! SurrealDB schema initialization for the ICE tables.
//!
//! Sets up tables with constraints and indexes. Safe to call multiple
//! times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;

/// Initialize all ICE tables.
///
/// Call once on first connection; repeated calls are no-ops.
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StateError> {
    info!("Initializing ICE SurrealDB schema");

    init_investigations_table(db).await?;
    init_audit_entries_table(db).await?;

    info!("ICE schema initialization complete");
    Ok(())
}

/// Initialize the `investigations` table.
///
/// Constraints:
/// - `investigation_id` is unique
/// - deletes are forbidden at the permission level (investigations are
///   retained for audit, terminal or not)
async fn init_investigations_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing investigations table");

    let sql = r#"
        DEFINE TABLE investigations
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        -- One row per investigation
        DEFINE INDEX idx_investigation_id ON TABLE investigations COLUMNS investigation_id UNIQUE;

        -- Status queries (list active investigations, sweep terminal ones)
        DEFINE INDEX idx_investigation_status ON TABLE investigations COLUMNS status;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::Schema(e.to_string()))?;
    Ok(())
}

/// Initialize the append-only `audit_entries` table.
async fn init_audit_entries_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing audit_entries table");

    let sql = r#"
        DEFINE TABLE audit_entries
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        -- Audit reads are always scoped to one investigation
        DEFINE INDEX idx_audit_investigation ON TABLE audit_entries COLUMNS investigation_id;

        -- One entry per (investigation, seq)
        DEFINE INDEX idx_audit_seq ON TABLE audit_entries COLUMNS investigation_id, seq UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::Schema(e.to_string()))?;
    Ok(())
}
