use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use serde::Deserialize;
use tracing::info;

use crate::core::client::database::constant::CONVERSATIONS_COLLECTION;
use crate::core::client::database::MigrationStore;
use crate::core::step::{MigrationStep, StepError};
use crate::migrations::parse;
use crate::types::version_record::SchemaVersion;

#[derive(Debug, Deserialize)]
struct LegacyConversation {
    #[serde(rename = "_id")]
    id: Bson,
    #[serde(default)]
    meta: Option<LegacyMeta>,
    #[serde(default)]
    context: Option<LegacyContext>,
}

#[derive(Debug, Deserialize)]
struct LegacyMeta {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LegacyContext {
    #[serde(default)]
    environment: Option<LegacyEnvironment>,
}

#[derive(Debug, Deserialize)]
struct LegacyEnvironment {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    support_area: Option<String>,
}

impl LegacyConversation {
    fn properties(&self) -> Document {
        let mut properties = Document::new();
        if let Some(tags) = self.meta.as_ref().and_then(|meta| meta.tags.as_ref()) {
            properties.insert("tags", tags.clone());
        }
        if let Some(environment) = self.context.as_ref().and_then(|context| context.environment.as_ref()) {
            if let Some(channel_id) = environment.channel_id.as_ref().filter(|id| !id.is_empty()) {
                properties.insert("channel_id", vec![channel_id.clone()]);
            }
            if let Some(support_area) = environment.support_area.as_ref().filter(|area| !area.is_empty()) {
                properties.insert("support_area", vec![support_area.clone()]);
            }
        }
        properties
    }
}

/// Collect tags, channel and support area of a conversation into `meta.properties`.
pub struct MetaProperties;

#[async_trait]
impl MigrationStep for MetaProperties {
    fn from_version(&self) -> SchemaVersion {
        2
    }

    fn description(&self) -> &'static str {
        "move tags, channel_id and support_area into meta.properties"
    }

    async fn apply(&self, store: &dyn MigrationStore) -> Result<String, StepError> {
        let pending = store.find_many(CONVERSATIONS_COLLECTION, doc! { "meta.properties": { "$exists": false } }).await?;
        let conversations = pending
            .into_iter()
            .map(|document| parse::<LegacyConversation>(CONVERSATIONS_COLLECTION, document))
            .collect::<Result<Vec<_>, _>>()?;

        let mut migrated = 0;
        for conversation in &conversations {
            let result = store
                .update_one(
                    CONVERSATIONS_COLLECTION,
                    doc! { "_id": conversation.id.clone(), "meta.properties": { "$exists": false } },
                    doc! {
                        "$set": { "meta.properties": conversation.properties() },
                        "$unset": { "meta.tags": true },
                    },
                    false,
                )
                .await?;
            migrated += result.modified_count;
        }

        info!(conversations = migrated, "Moved conversation metadata into meta.properties");
        Ok("success".to_string())
    }
}
