use async_trait::async_trait;
use mongodb::bson::{doc, Bson, DateTime};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::core::client::database::constant::{CLIENTS_COLLECTION, CONFIGURATION_COLLECTION, CONVERSATIONS_COLLECTION};
use crate::core::client::database::MigrationStore;
use crate::core::step::{MigrationStep, StepError};
use crate::migrations::parse;
use crate::types::version_record::SchemaVersion;

/// Conversation as stored at version 1: no owner yet, client is implied by the domain
#[derive(Debug, Deserialize)]
struct UnownedConversation {
    #[serde(default)]
    context: Option<ConversationContext>,
}

#[derive(Debug, Deserialize)]
struct ConversationContext {
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Client {
    #[serde(rename = "_id")]
    id: Bson,
}

/// Introduce clients: one per conversation domain, each owning its conversations and a default configuration.
pub struct CreateClients;

#[async_trait]
impl MigrationStep for CreateClients {
    fn from_version(&self) -> SchemaVersion {
        1
    }

    fn description(&self) -> &'static str {
        "create a client per conversation domain"
    }

    async fn apply(&self, store: &dyn MigrationStore) -> Result<String, StepError> {
        let unowned = store.find_many(CONVERSATIONS_COLLECTION, doc! { "owner": { "$exists": false } }).await?;
        let mut domains = BTreeSet::new();
        let mut without_domain = 0usize;
        for document in unowned {
            let conversation: UnownedConversation = parse(CONVERSATIONS_COLLECTION, document)?;
            match conversation.context.and_then(|context| context.domain) {
                Some(domain) => {
                    domains.insert(domain);
                }
                None => without_domain += 1,
            }
        }
        if without_domain > 0 {
            warn!(count = without_domain, "Conversations without a domain are left without owner");
        }

        let mut owned = 0;
        for domain in &domains {
            let client = ensure_client(store, domain).await?;

            let result = store
                .update_many(
                    CONVERSATIONS_COLLECTION,
                    doc! { "context.domain": domain, "owner": { "$exists": false } },
                    doc! { "$set": { "owner": client.id.clone() } },
                )
                .await?;
            owned += result.modified_count;

            store
                .update_one(
                    CONFIGURATION_COLLECTION,
                    doc! { "client": client.id },
                    doc! { "$setOnInsert": default_configuration() },
                    true,
                )
                .await?;
        }

        info!(clients = domains.len(), conversations = owned, "Assigned conversations to clients");
        Ok("success".to_string())
    }
}

async fn ensure_client(store: &dyn MigrationStore, domain: &str) -> Result<Client, StepError> {
    let update = doc! {
        "$setOnInsert": { "lastUpdate": DateTime::now(), "defaultClient": false },
    };
    let result = store.update_one(CLIENTS_COLLECTION, doc! { "name": domain }, update, true).await?;
    debug!(domain, created = result.upserted, "Ensured client");

    let document = store
        .find_one(CLIENTS_COLLECTION, doc! { "name": domain })
        .await?
        .ok_or_else(|| StepError::Failed(format!("client {domain} vanished after upsert")))?;
    parse(CLIENTS_COLLECTION, document)
}

fn default_configuration() -> mongodb::bson::Document {
    let now = DateTime::now();
    doc! {
        "created": now,
        "modified": now,
        "config": {
            "queryBuilder": [
                {
                    "name": "conversationmlt",
                    "displayName": "Related Conversations",
                    "type": "conversationmlt",
                    "enabled": true,
                    "unbound": false,
                    "configuration": {},
                },
                {
                    "solrEndpoint": "http://host.domain.org:8983/solr/change-me",
                    "search": {
                        "title": { "enabled": false, "field": "" },
                        "fullText": { "enabled": true, "field": "" },
                        "spatial": { "enabled": true, "locationNameField": "" },
                        "temporal": { "enabled": false },
                        "related": { "enabled": false, "fields": [] },
                    },
                    "defaults": { "rows": 10, "fields": "*,score" },
                    "result": {
                        "numOfRows": 10,
                        "mappings": {
                            "title": "title",
                            "description": "description",
                            "type": "type",
                            "doctype": "doctype",
                            "thumb": "thumb",
                            "link": "link",
                            "date": "date",
                            "source": "source",
                        },
                    },
                    "name": "search-endpoint-0",
                    "displayName": "Search Endpoint",
                    "type": "solrsearch",
                    "enabled": false,
                    "unbound": false,
                    "configuration": {},
                },
                {
                    "name": "conversationsearch",
                    "displayName": "conversationsearch",
                    "type": "conversationsearch",
                    "enabled": true,
                    "unbound": false,
                    "configuration": {},
                },
            ],
        },
    }
}
