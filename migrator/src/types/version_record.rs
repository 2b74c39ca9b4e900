use chrono::{DateTime, SubsecRound, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use mongodb::bson::{self, Bson};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::client::database::constant::VERSION_RECORD_ID;

/// Schema version of the store
pub type SchemaVersion = u32;

/// The singleton migration control record
///
/// Lives in the control collection under [`VERSION_RECORD_ID`]. It is the only
/// coordination point between concurrent migration runs and the audit log of
/// every attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, deserialize_with = "schema_version")]
    pub version: SchemaVersion,
    #[serde(default)]
    pub is_upgrading: bool,
    #[serde(default)]
    pub is_tainted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupDescriptor>,
    #[serde(default, deserialize_with = "history")]
    pub history: Vec<HistoryEntry>,
}

impl VersionRecord {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            id: VERSION_RECORD_ID.to_string(),
            version,
            is_upgrading: false,
            is_tainted: false,
            backup: None,
            history: Vec::new(),
        }
    }
}

/// Identity of a full-store snapshot taken before a migration step
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupDescriptor {
    /// Name of the database holding the snapshot
    pub name: String,
    /// Schema version of the store when the snapshot was taken
    #[serde(deserialize_with = "schema_version")]
    pub version: SchemaVersion,
    #[serde(with = "chrono_datetime_as_bson_datetime", alias = "date")]
    pub taken_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HistoryOutcome {
    Success,
    BackupFailed,
    /// Step failed, live data was rolled back to the backup, store is tainted
    Restored,
    /// Step failed and the rollback failed too; live data must not be trusted
    RestoreFailed,
    /// Version record created for an empty store
    Initialized,
    /// Step changed data but the upgrade lock was released before the version could be committed
    LockLost,
    /// Failed step recorded by the migration scripts, rollback result unknown
    Failed,
}

/// One append-only entry of the version record history
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub completed_at: DateTime<Utc>,
    pub outcome: HistoryOutcome,
    pub detail: String,
}

impl HistoryEntry {
    pub fn new(
        from_version: SchemaVersion,
        to_version: SchemaVersion,
        started_at: DateTime<Utc>,
        outcome: HistoryOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self { from_version, to_version, started_at, completed_at: now(), outcome, detail: detail.into() }
    }
}

/// History entry as written by the mongo shell migration scripts and the application start-up check
#[derive(Deserialize)]
struct ScriptHistoryEntry {
    #[serde(deserialize_with = "schema_version")]
    version: SchemaVersion,
    #[serde(default)]
    start: Option<bson::DateTime>,
    #[serde(default)]
    complete: Option<bson::DateTime>,
    #[serde(default)]
    result: Option<Bson>,
    #[serde(default)]
    success: bool,
}

impl From<ScriptHistoryEntry> for HistoryEntry {
    fn from(entry: ScriptHistoryEntry) -> Self {
        let detail = match entry.result {
            Some(Bson::String(result)) => result,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let (from_version, outcome) = match (entry.success, detail.as_str()) {
            (true, "initialized") => (entry.version, HistoryOutcome::Initialized),
            (true, _) => (entry.version.saturating_sub(1), HistoryOutcome::Success),
            (false, _) => (entry.version.saturating_sub(1), HistoryOutcome::Failed),
        };
        let started_at = entry.start.map(bson::DateTime::to_chrono).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            from_version,
            to_version: entry.version,
            started_at,
            completed_at: entry.complete.map(bson::DateTime::to_chrono).unwrap_or(started_at),
            outcome,
            detail,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredHistoryEntry {
    Current(HistoryEntry),
    Script(ScriptHistoryEntry),
}

fn history<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<HistoryEntry>, D::Error> {
    let entries = Option::<Vec<StoredHistoryEntry>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            StoredHistoryEntry::Current(entry) => entry,
            StoredHistoryEntry::Script(entry) => entry.into(),
        })
        .collect())
}

/// Versions written by the mongo shell are doubles; accept any whole, non-negative number.
fn schema_version<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SchemaVersion, D::Error> {
    use serde::de::Error;

    let value = Bson::deserialize(deserializer)?;
    let number = match value {
        Bson::Int32(v) => i64::from(v),
        Bson::Int64(v) => v,
        Bson::Double(v) if v.fract() == 0.0 && v >= 0.0 && v <= f64::from(SchemaVersion::MAX) => v as i64,
        other => return Err(D::Error::custom(format!("invalid schema version {other}"))),
    };
    SchemaVersion::try_from(number).map_err(|_| D::Error::custom(format!("schema version out of range: {number}")))
}

/// Current time at the precision BSON datetimes can store
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
