//! Schema definitions for the ICE SurrealDB tables.
//!
//! Tables:
//! - investigations: one row per investigation (versioned state document)
//! - audit_entries: append-only audit log, one row per successful update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialize chrono DateTime to SurrealDB's native datetime format.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in the `investigations` table.
///
/// The full [`crate::investigation::InvestigationState`] document is stored
/// in `state`; `version` and `status` are duplicated as columns so the CAS
/// update and status queries stay index-friendly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRow {
    pub investigation_id: String,
    pub version: u64,
    pub status: String,
    pub state: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Row in the `audit_entries` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryRow {
    pub investigation_id: String,
    pub seq: u64,
    pub from_version: u64,
    pub to_version: u64,
    pub mutation_kind: String,
    pub state_digest: String,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}
