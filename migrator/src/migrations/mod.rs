//! Registered migration steps, one module per `from -> to` pair.

pub mod v1_to_v2;
pub mod v2_to_v3;
pub mod v6_to_v7;

use mongodb::bson::{self, Document};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::step::{MigrationStep, StepError};
use crate::types::version_record::SchemaVersion;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No migration steps registered")]
    Empty,

    #[error("More than one step registered for version {0}")]
    Duplicate(SchemaVersion),

    #[error("Step from version {from} targets {to}, steps must advance exactly one version")]
    NotSingleStep { from: SchemaVersion, to: SchemaVersion },

    #[error("No step registered from version {0}")]
    UnknownStep(SchemaVersion),
}

/// Source version of the first shipped step, read for an absent version record unless configured otherwise
pub const BASELINE_VERSION: SchemaVersion = 1;

/// Ordered chain of single-version migration steps
///
/// Version numbers follow the store's history. Versions whose migrations are
/// no longer shipped (3 to 6) leave a gap: a store stuck in one is reported as
/// behind by the step after the gap.
pub struct StepRegistry {
    steps: BTreeMap<SchemaVersion, Box<dyn MigrationStep>>,
}

impl StepRegistry {
    pub fn new(steps: Vec<Box<dyn MigrationStep>>) -> Result<Self, RegistryError> {
        let mut chain = BTreeMap::new();
        for step in steps {
            let (from, to) = (step.from_version(), step.to_version());
            if from.checked_add(1) != Some(to) {
                return Err(RegistryError::NotSingleStep { from, to });
            }
            if chain.insert(from, step).is_some() {
                return Err(RegistryError::Duplicate(from));
            }
        }
        if chain.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { steps: chain })
    }

    /// The steps shipped with this crate
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(vec![
            Box::new(v1_to_v2::CreateClients),
            Box::new(v2_to_v3::MetaProperties),
            Box::new(v6_to_v7::RocketChatSearch),
        ])
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn MigrationStep> {
        self.steps.values().map(|step| step.as_ref())
    }

    pub fn get(&self, from: SchemaVersion) -> Result<&dyn MigrationStep, RegistryError> {
        self.steps.get(&from).map(|step| step.as_ref()).ok_or(RegistryError::UnknownStep(from))
    }

    /// Source version of the first step
    pub fn baseline(&self) -> SchemaVersion {
        self.steps.keys().next().copied().unwrap_or_default()
    }

    /// Version the store is at once every step ran
    pub fn latest(&self) -> SchemaVersion {
        self.steps.values().next_back().map(|step| step.to_version()).unwrap_or_default()
    }
}

/// Deserialize a stored document into the shape a step expects.
pub(crate) fn parse<T: DeserializeOwned>(collection: &str, document: Document) -> Result<T, StepError> {
    let id = document.get("_id").map(ToString::to_string).unwrap_or_else(|| "<no id>".to_string());
    bson::from_document(document).map_err(|e| StepError::InvalidShape {
        collection: collection.to_string(),
        reason: format!("document {id}: {e}"),
    })
}
