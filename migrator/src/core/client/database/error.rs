use mongodb::bson;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Mongo error: {0}")]
    MongoError(#[from] mongodb::error::Error),

    #[error("Failed to serialize document: {0}")]
    FailedToSerializeDocument(String),

    #[error("Failed to deserialize document: {0}")]
    FailedToDeserializeDocument(String),

    /// A write would have created a second document with an existing `_id`
    #[error("Duplicate key in collection {collection}: {key}")]
    DuplicateKey { collection: String, key: String },

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot target already exists: {0}")]
    SnapshotExists(String),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

impl From<bson::ser::Error> for DatabaseError {
    fn from(err: bson::ser::Error) -> Self {
        DatabaseError::FailedToSerializeDocument(err.to_string())
    }
}

impl From<bson::de::Error> for DatabaseError {
    fn from(err: bson::de::Error) -> Self {
        DatabaseError::FailedToDeserializeDocument(err.to_string())
    }
}

impl DatabaseError {
    /// True for errors that mean "a conditional upsert lost the race against an existing document".
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            DatabaseError::DuplicateKey { .. } => true,
            DatabaseError::MongoError(err) => is_mongo_duplicate_key(err),
            _ => false,
        }
    }
}

const MONGO_DUPLICATE_KEY_CODE: i32 = 11000;

fn is_mongo_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == MONGO_DUPLICATE_KEY_CODE,
        ErrorKind::Command(command_error) => command_error.code == MONGO_DUPLICATE_KEY_CODE,
        _ => false,
    }
}
