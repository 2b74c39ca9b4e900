pub mod outcome;
pub mod params;
pub mod version_record;

pub use outcome::RunOutcome;
pub use version_record::{BackupDescriptor, HistoryEntry, HistoryOutcome, SchemaVersion, VersionRecord};
