use mongodb::bson::{self, doc, Document};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::core::client::database::constant::VERSION_RECORD_ID;
use crate::core::client::database::{DatabaseError, MigrationStore};
use crate::types::version_record::{BackupDescriptor, HistoryEntry, SchemaVersion, VersionRecord};

/// Typed access to the version record
///
/// Every method re-reads or conditionally writes the authoritative record in
/// the store; nothing is cached between calls.
#[derive(Clone)]
pub struct VersionRepository {
    store: Arc<dyn MigrationStore>,
    collection: String,
}

impl VersionRepository {
    pub fn new(store: Arc<dyn MigrationStore>, collection: impl Into<String>) -> Self {
        Self { store, collection: collection.into() }
    }

    pub fn store(&self) -> &Arc<dyn MigrationStore> {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn id_filter() -> Document {
        doc! { "_id": VERSION_RECORD_ID }
    }

    pub async fn get(&self) -> Result<Option<VersionRecord>, DatabaseError> {
        let document = self.store.find_one(&self.collection, Self::id_filter()).await?;
        trace!(found = document.is_some(), "Fetched version record");
        document.map(bson::from_document::<VersionRecord>).transpose().map_err(DatabaseError::from)
    }

    /// Atomically flip `isUpgrading` to true if the record is at `expected`, unlocked and untainted.
    ///
    /// Creates the record when none exists yet. Returns true iff this call
    /// changed or created the record.
    pub async fn try_mark_upgrading(&self, expected: SchemaVersion) -> Result<bool, DatabaseError> {
        let filter = doc! {
            "_id": VERSION_RECORD_ID,
            "version": i64::from(expected),
            "isUpgrading": false,
            "isTainted": false,
        };
        let update = doc! {
            "$set": { "isUpgrading": true },
            "$setOnInsert": { "history": [] },
        };
        match self.store.update_one(&self.collection, filter, update, true).await {
            Ok(result) => Ok(result.applied_once()),
            Err(err) if err.is_duplicate_key() => {
                debug!(expected_version = expected, "Upsert of version record lost against an existing record");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Unconditionally clear `isUpgrading`. Returns true if the record was locked.
    pub async fn clear_upgrading(&self) -> Result<bool, DatabaseError> {
        let result = self
            .store
            .update_one(&self.collection, Self::id_filter(), doc! { "$set": { "isUpgrading": false } }, false)
            .await?;
        Ok(result.modified_count == 1)
    }

    pub async fn set_backup(&self, backup: &BackupDescriptor) -> Result<(), DatabaseError> {
        let update = doc! { "$set": { "backup": bson::to_bson(backup)? } };
        self.store.update_one(&self.collection, Self::id_filter(), update, false).await?;
        Ok(())
    }

    pub async fn unset_backup(&self) -> Result<bool, DatabaseError> {
        let result = self
            .store
            .update_one(&self.collection, Self::id_filter(), doc! { "$unset": { "backup": true } }, false)
            .await?;
        Ok(result.modified_count == 1)
    }

    /// Advance the version from `from` to `to` and append `entry`, only while the lock for `from` is held.
    ///
    /// Returns false when the record no longer is locked at `from`.
    pub async fn commit_version(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
        entry: &HistoryEntry,
    ) -> Result<bool, DatabaseError> {
        let filter = doc! { "_id": VERSION_RECORD_ID, "version": i64::from(from), "isUpgrading": true };
        let update = doc! {
            "$set": { "version": i64::from(to) },
            "$push": { "history": bson::to_bson(entry)? },
        };
        let result = self.store.update_one(&self.collection, filter, update, false).await?;
        Ok(result.modified_count == 1)
    }

    pub async fn mark_tainted(&self) -> Result<(), DatabaseError> {
        self.store
            .update_one(&self.collection, Self::id_filter(), doc! { "$set": { "isTainted": true } }, false)
            .await?;
        Ok(())
    }

    /// Clear `isTainted`. Returns true if the record was tainted.
    pub async fn clear_taint(&self) -> Result<bool, DatabaseError> {
        let result = self
            .store
            .update_one(&self.collection, Self::id_filter(), doc! { "$set": { "isTainted": false } }, false)
            .await?;
        Ok(result.modified_count == 1)
    }

    pub async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        let update = doc! { "$push": { "history": bson::to_bson(entry)? } };
        self.store.update_one(&self.collection, Self::id_filter(), update, false).await?;
        Ok(())
    }

    /// Create the record for an empty store. Returns false if a record already exists.
    pub async fn initialize(&self, version: SchemaVersion, entry: &HistoryEntry) -> Result<bool, DatabaseError> {
        let mut record = VersionRecord::new(version);
        record.history.push(entry.clone());
        let document = bson::to_document(&record)?;
        match self.store.insert_one(&self.collection, document).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_duplicate_key() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
