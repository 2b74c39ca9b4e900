/// Collection holding the migration control record, shared with the application's start-up check
///
/// The collection is never rolled back by a restore: it is the ledger of every
/// migration attempt, including the one that triggered the restore.
pub const CONTROL_COLLECTION: &str = "smarti";

/// Identifier of the singleton version record inside the control collection
pub const VERSION_RECORD_ID: &str = "db-version";

pub const CONVERSATIONS_COLLECTION: &str = "conversations";
pub const CLIENTS_COLLECTION: &str = "client";
pub const CONFIGURATION_COLLECTION: &str = "configuration";

/// Analysis cache, safe to drop at any time
pub const ANALYSIS_COLLECTION: &str = "analysis";
