pub mod query;

use self::query::{apply_update, matches, upsert_seed};
use crate::core::client::database::{DatabaseError, MigrationStore, UpdateResult};
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Collections of one in-memory database, in insertion order
pub type Collections = BTreeMap<String, Vec<Document>>;

/// In-process store with MongoDB-like semantics
///
/// Every operation takes the same server-wide mutex, so each call is atomic
/// in the same way a single-document MongoDB write is. Databases created by
/// [`MigrationStore::snapshot`] live on the same server and are reachable
/// through [`MigrationStore::sibling`].
#[derive(Clone)]
pub struct MemoryStore {
    server: Arc<Mutex<BTreeMap<String, Collections>>>,
    database: String,
}

impl MemoryStore {
    pub fn new(database_name: &str) -> Self {
        Self { server: Arc::new(Mutex::new(BTreeMap::new())), database: database_name.to_string() }
    }

    /// Seed a database with fixture collections
    pub fn with_collections(database_name: &str, collections: Collections) -> Self {
        let store = Self::new(database_name);
        if let Ok(mut server) = store.server.lock() {
            server.insert(database_name.to_string(), collections);
        }
        store
    }

    /// Copy of the current contents of this database
    pub fn dump(&self) -> Result<Collections, DatabaseError> {
        self.with_server(|server| Ok(server.get(&self.database).cloned().unwrap_or_default()))
    }

    /// Names of every database on the server, including snapshots
    pub fn database_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.with_server(|server| Ok(server.keys().cloned().collect()))
    }

    fn with_server<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Collections>) -> Result<R, DatabaseError>,
    ) -> Result<R, DatabaseError> {
        let mut server = self.server.lock().map_err(|e| DatabaseError::Poisoned(e.to_string()))?;
        f(&mut server)
    }

    fn with_collection<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Vec<Document>) -> Result<R, DatabaseError>,
    ) -> Result<R, DatabaseError> {
        self.with_server(|server| {
            let database = server.entry(self.database.clone()).or_default();
            f(database.entry(collection.to_string()).or_default())
        })
    }
}

fn ensure_unique_id(collection: &str, documents: &[Document], document: &mut Document) -> Result<(), DatabaseError> {
    match document.get("_id") {
        None => {
            document.insert("_id", Bson::ObjectId(ObjectId::new()));
            Ok(())
        }
        Some(id) => {
            if documents.iter().any(|existing| existing.get("_id").is_some_and(|other| query::bson_eq(other, id))) {
                Err(DatabaseError::DuplicateKey { collection: collection.to_string(), key: id.to_string() })
            } else {
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    fn name(&self) -> String {
        self.database.clone()
    }

    fn sibling(&self, database_name: &str) -> Arc<dyn MigrationStore> {
        Arc::new(Self { server: self.server.clone(), database: database_name.to_string() })
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>, DatabaseError> {
        self.with_collection(collection, |documents| {
            for document in documents.iter() {
                if matches(document, &filter)? {
                    return Ok(Some(document.clone()));
                }
            }
            Ok(None)
        })
    }

    async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>, DatabaseError> {
        self.with_collection(collection, |documents| {
            let mut found = Vec::new();
            for document in documents.iter() {
                if matches(document, &filter)? {
                    found.push(document.clone());
                }
            }
            Ok(found)
        })
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<(), DatabaseError> {
        self.with_collection(collection, |documents| {
            ensure_unique_id(collection, documents, &mut document)?;
            documents.push(document);
            Ok(())
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DatabaseError> {
        self.with_collection(collection, |documents| {
            for document in documents.iter_mut() {
                if matches(document, &filter)? {
                    let mut updated = document.clone();
                    apply_update(&mut updated, &update, false)?;
                    let modified = updated != *document;
                    *document = updated;
                    return Ok(UpdateResult { matched_count: 1, modified_count: u64::from(modified), upserted: false });
                }
            }
            if !upsert {
                return Ok(UpdateResult::default());
            }
            let mut inserted = upsert_seed(&filter)?;
            apply_update(&mut inserted, &update, true)?;
            ensure_unique_id(collection, documents, &mut inserted)?;
            documents.push(inserted);
            Ok(UpdateResult { matched_count: 0, modified_count: 0, upserted: true })
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DatabaseError> {
        self.with_collection(collection, |documents| {
            let mut result = UpdateResult::default();
            for document in documents.iter_mut() {
                if matches(document, &filter)? {
                    let mut updated = document.clone();
                    apply_update(&mut updated, &update, false)?;
                    result.matched_count += 1;
                    if updated != *document {
                        result.modified_count += 1;
                        *document = updated;
                    }
                }
            }
            Ok(result)
        })
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError> {
        self.with_server(|server| {
            if let Some(database) = server.get_mut(&self.database) {
                database.remove(collection);
            }
            Ok(())
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError> {
        self.with_server(|server| Ok(server.get(&self.database).map(|db| db.keys().cloned().collect()).unwrap_or_default()))
    }

    async fn snapshot(&self, target: &str) -> Result<(), DatabaseError> {
        self.with_server(|server| {
            if server.get(target).is_some_and(|db| !db.is_empty()) {
                return Err(DatabaseError::SnapshotExists(target.to_string()));
            }
            let contents = server.get(&self.database).cloned().unwrap_or_default();
            server.insert(target.to_string(), contents);
            Ok(())
        })
    }

    async fn restore(&self, source: &str, keep_collection: &str) -> Result<(), DatabaseError> {
        self.with_server(|server| {
            let snapshot = server.get(source).cloned().ok_or_else(|| DatabaseError::SnapshotNotFound(source.to_string()))?;
            let live = server.entry(self.database.clone()).or_default();
            live.retain(|name, _| name == keep_collection);
            for (name, documents) in snapshot {
                if name != keep_collection {
                    live.insert(name, documents);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn conditional_upsert_conflicts_on_existing_id() {
        let store = MemoryStore::new("smarti");
        let first = store
            .update_one("migrator", doc! { "_id": "db-version", "version": 1 }, doc! { "$set": { "x": 1 } }, true)
            .await
            .unwrap();
        assert!(first.upserted);

        let second = store
            .update_one("migrator", doc! { "_id": "db-version", "version": 7 }, doc! { "$set": { "x": 2 } }, true)
            .await;
        assert!(second.unwrap_err().is_duplicate_key());
    }

    #[rstest]
    #[tokio::test]
    async fn update_reports_unmodified_documents() {
        let store = MemoryStore::new("smarti");
        store.insert_one("c", doc! { "_id": 1, "a": 1 }).await.unwrap();
        let result = store.update_one("c", doc! { "_id": 1 }, doc! { "$set": { "a": 1 } }, false).await.unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 0, upserted: false });
    }

    #[rstest]
    #[tokio::test]
    async fn restore_keeps_the_control_collection() {
        let store = MemoryStore::new("smarti");
        store.insert_one("data", doc! { "_id": 1 }).await.unwrap();
        store.insert_one("ledger", doc! { "_id": "a" }).await.unwrap();
        store.snapshot("smarti_1").await.unwrap();

        store.insert_one("data", doc! { "_id": 2 }).await.unwrap();
        store.insert_one("extra", doc! { "_id": 3 }).await.unwrap();
        store.insert_one("ledger", doc! { "_id": "b" }).await.unwrap();
        store.restore("smarti_1", "ledger").await.unwrap();

        let dump = store.dump().unwrap();
        assert_eq!(dump["data"], vec![doc! { "_id": 1 }]);
        assert!(!dump.contains_key("extra"));
        assert_eq!(dump["ledger"].len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn restore_from_missing_snapshot_fails() {
        let store = MemoryStore::new("smarti");
        assert!(matches!(store.restore("nope", "ledger").await, Err(DatabaseError::SnapshotNotFound(_))));
    }
}
