//! Tests against a running MongoDB, selected by `MIGRATOR_MONGODB_CONNECTION_URL`.
//!
//! Run with `cargo test -- --ignored`. Every test works in its own database and
//! drops it (and its snapshots) afterwards.

use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use rstest::*;
use std::sync::Arc;

use crate::core::client::database::constant::{CLIENTS_COLLECTION, CONTROL_COLLECTION, CONVERSATIONS_COLLECTION};
use crate::core::client::database::mongodb::MongoStore;
use crate::core::client::database::MigrationStore;
use crate::core::client::database::repository::VersionRepository;
use crate::core::client::lock::{LockManager, UpgradeLock};
use crate::core::MigrationDriver;
use crate::migrations::v1_to_v2::CreateClients;
use crate::tests::common::{fast_settings, legacy_conversations};
use crate::types::params::DatabaseArgs;
use crate::types::RunOutcome;

struct TestDatabase {
    store: MongoStore,
}

impl TestDatabase {
    async fn cleanup(self) -> color_eyre::Result<()> {
        let client = self.store.client();
        let prefix = self.store.name();
        for name in client.list_database_names(None, None).await? {
            if name.starts_with(&prefix) {
                client.database(&name).drop(None).await?;
            }
        }
        Ok(())
    }
}

#[fixture]
async fn database() -> TestDatabase {
    dotenvy::dotenv().ok();
    let args = DatabaseArgs {
        connection_uri: std::env::var("MIGRATOR_MONGODB_CONNECTION_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
        database_name: format!("migrator_test_{}", mongodb::bson::oid::ObjectId::new().to_hex()),
    };
    TestDatabase { store: MongoStore::new(&args).await.expect("MongoDB reachable") }
}

#[rstest]
#[tokio::test]
#[ignore = "requires MongoDB"]
async fn upsert_lock_has_a_single_winner(#[future] database: TestDatabase) -> color_eyre::Result<()> {
    let database = database.await;
    let store: Arc<dyn MigrationStore> = Arc::new(database.store.clone());

    let contenders = (0..8).map(|_| {
        let locks = LockManager::new(VersionRepository::new(store.clone(), CONTROL_COLLECTION));
        tokio::spawn(async move { locks.try_acquire(1).await.map(|lock| lock.map(UpgradeLock::forfeit).is_some()) })
    });
    let mut winners = 0;
    for contender in futures::future::join_all(contenders).await {
        if contender?? {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    database.cleanup().await
}

#[rstest]
#[tokio::test]
#[ignore = "requires MongoDB"]
async fn failed_step_is_restored_from_a_real_snapshot(#[future] database: TestDatabase) -> color_eyre::Result<()> {
    let database = database.await;
    let store: Arc<dyn MigrationStore> = Arc::new(database.store.clone());
    for conversation in legacy_conversations() {
        store.insert_one(CONVERSATIONS_COLLECTION, conversation).await?;
    }

    let driver = MigrationDriver::new(store.clone(), fast_settings(1));
    assert_eq!(driver.run_step(&CreateClients).await?, RunOutcome::Migrated { from: 1, to: 2 });

    let record = VersionRepository::new(store.clone(), CONTROL_COLLECTION).get().await?.expect("version record");
    assert_eq!(record.version, 2);
    let backup = record.backup.expect("backup descriptor");
    let snapshot = store.sibling(&backup.name);
    assert_eq!(snapshot.find_many(CONVERSATIONS_COLLECTION, doc! {}).await?.len(), 3);
    assert!(snapshot.find_one(CONVERSATIONS_COLLECTION, doc! { "owner": { "$exists": true } }).await?.is_none());

    store.restore(&backup.name, CONTROL_COLLECTION).await?;
    assert!(store.find_one(CONVERSATIONS_COLLECTION, doc! { "owner": { "$exists": true } }).await?.is_none());
    let record = VersionRepository::new(store, CONTROL_COLLECTION).get().await?.expect("version record");
    assert_eq!(record.version, 2);

    database.cleanup().await
}

async fn index_names(store: &MongoStore, database: &str, collection: &str) -> color_eyre::Result<Vec<String>> {
    let indexes = store.client().database(database).collection::<Document>(collection).list_index_names().await?;
    Ok(indexes)
}

#[rstest]
#[tokio::test]
#[ignore = "requires MongoDB"]
async fn snapshot_and_restore_keep_indexes_and_empty_collections(
    #[future] database: TestDatabase,
) -> color_eyre::Result<()> {
    let database = database.await;
    let store = database.store.clone();
    let live = store.name();
    let clients = store.client().database(&live).collection::<Document>(CLIENTS_COLLECTION);
    let unique_name = IndexModel::builder()
        .keys(doc! { "name": 1 })
        .options(IndexOptions::builder().name("client_name".to_string()).unique(true).build())
        .build();
    clients.create_index(unique_name, None).await?;
    for id in 0..2500 {
        store.insert_one(CLIENTS_COLLECTION, doc! { "name": format!("client-{id}") }).await?;
    }
    store.client().database(&live).create_collection("empty", None).await?;

    let snapshot = format!("{live}_snapshot");
    store.snapshot(&snapshot).await?;
    assert!(index_names(&store, &snapshot, CLIENTS_COLLECTION).await?.contains(&"client_name".to_string()));
    assert_eq!(store.sibling(&snapshot).find_many(CLIENTS_COLLECTION, doc! {}).await?.len(), 2500);
    assert!(store.sibling(&snapshot).list_collections().await?.contains(&"empty".to_string()));

    store.restore(&snapshot, CONTROL_COLLECTION).await?;
    assert!(index_names(&store, &live, CLIENTS_COLLECTION).await?.contains(&"client_name".to_string()));
    assert_eq!(store.find_many(CLIENTS_COLLECTION, doc! {}).await?.len(), 2500);
    assert!(store.list_collections().await?.contains(&"empty".to_string()));
    let duplicate = store.insert_one(CLIENTS_COLLECTION, doc! { "name": "client-7" }).await;
    assert!(duplicate.is_err());

    database.cleanup().await
}
