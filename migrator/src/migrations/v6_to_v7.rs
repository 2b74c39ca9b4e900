use async_trait::async_trait;
use mongodb::bson::{doc, Bson};
use serde::Deserialize;
use tracing::info;

use crate::core::client::database::constant::{ANALYSIS_COLLECTION, CONFIGURATION_COLLECTION};
use crate::core::client::database::MigrationStore;
use crate::core::step::{MigrationStep, StepError};
use crate::migrations::parse;
use crate::types::version_record::SchemaVersion;

const CONVERSATION_SEARCH: &str = "conversationsearch";
const ROCKETCHAT_SEARCH: &str = "rocketchatsearch";

#[derive(Debug, Deserialize)]
struct ClientConfiguration {
    #[serde(rename = "_id")]
    id: Bson,
    #[serde(default)]
    config: Option<Config>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(default)]
    query_builder: Vec<QueryBuilder>,
}

#[derive(Debug, Deserialize)]
struct QueryBuilder {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    enabled: bool,
}

impl ClientConfiguration {
    fn builder(&self, kind: &str) -> Option<&QueryBuilder> {
        self.config.as_ref()?.query_builder.iter().find(|builder| builder.kind == kind)
    }
}

/// Drop the analysis cache and add the Rocket.Chat search builder next to every conversation search.
pub struct RocketChatSearch;

#[async_trait]
impl MigrationStep for RocketChatSearch {
    fn from_version(&self) -> SchemaVersion {
        6
    }

    fn description(&self) -> &'static str {
        "drop analysis cache, configure rocketchatsearch"
    }

    async fn apply(&self, store: &dyn MigrationStore) -> Result<String, StepError> {
        store.drop_collection(ANALYSIS_COLLECTION).await?;

        let mut configured = 0;
        for document in store.find_many(CONFIGURATION_COLLECTION, doc! {}).await? {
            let configuration: ClientConfiguration = parse(CONFIGURATION_COLLECTION, document)?;
            let Some(conversation_search) = configuration.builder(CONVERSATION_SEARCH) else {
                continue;
            };
            if configuration.builder(ROCKETCHAT_SEARCH).is_some() {
                continue;
            }

            let builder = doc! {
                "name": ROCKETCHAT_SEARCH,
                "displayName": "Ähnliche Nachrichten",
                "type": ROCKETCHAT_SEARCH,
                "enabled": conversation_search.enabled,
                "unbound": false,
                "configuration": { "excludeCurrentChannel": false, "payload": { "rows": 10 } },
            };
            let filter = doc! {
                "_id": configuration.id.clone(),
                "config.queryBuilder.type": { "$ne": ROCKETCHAT_SEARCH },
            };
            let result = store
                .update_one(CONFIGURATION_COLLECTION, filter, doc! { "$push": { "config.queryBuilder": builder } }, false)
                .await?;
            if result.modified_count == 1 {
                configured += 1;
            }
        }

        info!(configurations = configured, "Configured rocketchatsearch query builder");
        Ok("success".to_string())
    }
}
