use serde::{Deserialize, Serialize};

/// Validated MongoDB parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseArgs {
    pub connection_uri: String,
    pub database_name: String,
}

impl Default for DatabaseArgs {
    fn default() -> Self {
        Self { connection_uri: "mongodb://localhost:27017".to_string(), database_name: "smarti".to_string() }
    }
}
