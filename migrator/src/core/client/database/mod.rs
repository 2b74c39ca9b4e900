pub mod constant;
pub mod error;
#[cfg(test)]
pub mod memory;
pub mod mongodb;
pub mod repository;

use ::mongodb::bson::Document;
use async_trait::async_trait;
pub use error::DatabaseError;
use std::sync::Arc;

/// Result of a single- or multi-document update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// True when an upsert inserted a new document instead of matching one
    pub upserted: bool,
}

impl UpdateResult {
    /// Exactly one document was changed or created by this call.
    pub fn applied_once(&self) -> bool {
        self.modified_count == 1 || (self.upserted && self.matched_count == 0)
    }
}

/// Store driver used by the migration core
///
/// The store must offer atomic single-document conditional writes: an
/// `update_one` whose filter does not match must not modify anything, and two
/// concurrent `update_one` calls on the same document must be serialized. That
/// is the only synchronization primitive the migration core relies on.
///
/// Filters and updates use the MongoDB document syntax. Implementations are
/// only required to support the subset used by this crate: equality on
/// (dotted) paths, `$exists` and `$ne` in filters; `$set`, `$unset`, `$push`
/// and `$setOnInsert` in updates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Name of the database this handle points at
    fn name(&self) -> String;

    /// Handle to another database on the same server
    fn sibling(&self, database_name: &str) -> Arc<dyn MigrationStore>;

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>, DatabaseError>;

    async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>, DatabaseError>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), DatabaseError>;

    /// Conditional update of a single document, optionally inserting it when nothing matches.
    ///
    /// An upsert whose filter names an `_id` that already exists (but does not
    /// match the rest of the filter) fails with a duplicate key error.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DatabaseError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DatabaseError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError>;

    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError>;

    /// Copy every collection of this database into the (new) database `target`.
    async fn snapshot(&self, target: &str) -> Result<(), DatabaseError>;

    /// Drop every collection of this database except `keep_collection` and
    /// replace them with the collections of the database `source` (again
    /// skipping `keep_collection`).
    async fn restore(&self, source: &str, keep_collection: &str) -> Result<(), DatabaseError>;
}
