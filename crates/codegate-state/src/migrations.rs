//! SurrealDB schema migrations and initialization
//!
//! Sets up the `validations` table used by the SurrealDB version store.

use crate::error::StateError;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all codegate tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StateError> {
    info!("Initializing codegate SurrealDB schema");
    init_validations_table(db).await?;
    info!("codegate schema initialization complete");
    Ok(())
}

/// Initialize `validations` table
///
/// Schema:
/// ```text
/// TABLE validations {
///   version_id:  INT (unique)
///   status:      STRING (pending | running | passed | failed | error)
///   message:     STRING?
///   result:      OBJECT?
///   updated_at:  STRING (RFC 3339)
/// }
/// ```
///
/// One row per version; writers replace the row (last write wins).
async fn init_validations_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing validations table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS validations SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_version_id ON TABLE validations COLUMNS version_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_status ON TABLE validations COLUMNS status;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(format!("validations table: {e}")))?
        .check()
        .map_err(|e| StateError::SchemaSetup(format!("validations table: {e}")))?;

    Ok(())
}
