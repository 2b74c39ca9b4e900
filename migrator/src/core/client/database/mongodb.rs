use crate::core::client::database::{DatabaseError, MigrationStore, UpdateResult};
use crate::types::params::database::DatabaseArgs;
use crate::utils::metrics::MIGRATOR_METRICS;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document};
use mongodb::options::UpdateOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Documents written per `insert_many` call while copying a collection
const COPY_BATCH_SIZE: usize = 1000;

const ID_INDEX_NAME: &str = "_id_";

/// Record the response time of a database call under `db_operation_name`
async fn record_metrics<T, F, Fut>(operation: &'static str, call: F) -> Result<T, DatabaseError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    let start = Instant::now();
    let result = call().await;
    let attributes = [KeyValue::new("db_operation_name", operation)];
    MIGRATOR_METRICS.db_calls_response_time.record(start.elapsed().as_secs_f64(), &attributes);
    result
}

/// MongoDB implementation of [`MigrationStore`]
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Arc<Database>,
}

impl MongoStore {
    pub async fn new(config: &DatabaseArgs) -> Result<Self, DatabaseError> {
        let client = Client::with_uri_str(&config.connection_uri).await?;
        let database = Arc::new(client.database(&config.database_name));
        Ok(Self { client, database })
    }

    /// Mongodb client uses Arc internally, reducing the cost of clone.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DatabaseError> {
        let names = self.client.list_database_names(None, None).await?;
        Ok(names.iter().any(|existing| existing == name))
    }

    async fn user_collections(database: &Database) -> Result<Vec<String>, DatabaseError> {
        let names = database.list_collection_names(None).await?;
        Ok(names.into_iter().filter(|name| !name.starts_with("system.")).collect())
    }

    /// Copy every document of `name` from `source` into `target`, returning the number of documents copied
    ///
    /// Documents are streamed from the source cursor and written in batches of [`COPY_BATCH_SIZE`].
    async fn copy_collection(source: &Database, target: &Database, name: &str) -> Result<usize, DatabaseError> {
        target.create_collection(name, None).await?;
        let target_collection = target.collection::<Document>(name);
        let mut cursor = source.collection::<Document>(name).find(None, None).await?;
        let mut batch = Vec::with_capacity(COPY_BATCH_SIZE);
        let mut copied = 0;
        while let Some(document) = cursor.try_next().await? {
            batch.push(document);
            if batch.len() == COPY_BATCH_SIZE {
                copied += batch.len();
                target_collection.insert_many(std::mem::take(&mut batch), None).await?;
                batch.reserve(COPY_BATCH_SIZE);
            }
        }
        if !batch.is_empty() {
            copied += batch.len();
            target_collection.insert_many(batch, None).await?;
        }
        Self::copy_indexes(source, target, name).await?;
        Ok(copied)
    }

    /// Recreate the secondary indexes of `name` on the copy. The `_id` index exists already.
    async fn copy_indexes(source: &Database, target: &Database, name: &str) -> Result<usize, DatabaseError> {
        let indexes: Vec<IndexModel> = source.collection::<Document>(name).list_indexes(None).await?.try_collect().await?;
        let indexes: Vec<IndexModel> = indexes
            .into_iter()
            .filter(|index| index.options.as_ref().and_then(|options| options.name.as_deref()) != Some(ID_INDEX_NAME))
            .collect();
        let count = indexes.len();
        if count > 0 {
            target.collection::<Document>(name).create_indexes(indexes, None).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl MigrationStore for MongoStore {
    fn name(&self) -> String {
        self.database.name().to_string()
    }

    fn sibling(&self, database_name: &str) -> Arc<dyn MigrationStore> {
        Arc::new(Self { client: self.client.clone(), database: Arc::new(self.client.database(database_name)) })
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>, DatabaseError> {
        record_metrics("find_one", || async { Ok(self.collection(collection).find_one(filter, None).await?) }).await
    }

    async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>, DatabaseError> {
        record_metrics("find_many", || async {
            let cursor = self.collection(collection).find(filter, None).await?;
            Ok(cursor.try_collect().await?)
        })
        .await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), DatabaseError> {
        record_metrics("insert_one", || async {
            self.collection(collection).insert_one(document, None).await?;
            Ok(())
        })
        .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DatabaseError> {
        record_metrics("update_one", || async {
            let options = UpdateOptions::builder().upsert(upsert).build();
            let result = self.collection(collection).update_one(filter, update, options).await?;
            Ok(UpdateResult {
                matched_count: result.matched_count,
                modified_count: result.modified_count,
                upserted: matches!(result.upserted_id, Some(ref id) if *id != Bson::Null),
            })
        })
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, DatabaseError> {
        record_metrics("update_many", || async {
            let result = self.collection(collection).update_many(filter, update, None).await?;
            Ok(UpdateResult {
                matched_count: result.matched_count,
                modified_count: result.modified_count,
                upserted: false,
            })
        })
        .await
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError> {
        record_metrics("drop_collection", || async {
            self.collection(collection).drop(None).await?;
            Ok(())
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError> {
        record_metrics("list_collections", || async { Self::user_collections(&self.database).await }).await
    }

    async fn snapshot(&self, target: &str) -> Result<(), DatabaseError> {
        record_metrics("snapshot", || async {
            if self.database_exists(target).await? {
                return Err(DatabaseError::SnapshotExists(target.to_string()));
            }
            let target_database = self.client.database(target);
            for name in Self::user_collections(&self.database).await? {
                let copied = Self::copy_collection(&self.database, &target_database, &name).await?;
                debug!(collection = %name, documents = copied, target = %target, "Copied collection into snapshot");
            }
            info!(source = %self.database.name(), target = %target, "Snapshot completed");
            Ok(())
        })
        .await
    }

    async fn restore(&self, source: &str, keep_collection: &str) -> Result<(), DatabaseError> {
        record_metrics("restore", || async {
            if !self.database_exists(source).await? {
                return Err(DatabaseError::SnapshotNotFound(source.to_string()));
            }
            for name in Self::user_collections(&self.database).await? {
                if name != keep_collection {
                    self.collection(&name).drop(None).await?;
                }
            }
            let source_database = self.client.database(source);
            for name in Self::user_collections(&source_database).await? {
                if name != keep_collection {
                    let copied = Self::copy_collection(&source_database, &self.database, &name).await?;
                    debug!(collection = %name, documents = copied, source = %source, "Restored collection");
                }
            }
            info!(target = %self.database.name(), source = %source, "Restore completed");
            Ok(())
        })
        .await
    }
}
