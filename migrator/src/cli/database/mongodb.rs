use clap::Args;

/// Parameters used to config MongoDB.
#[derive(Debug, Clone, Args)]
pub struct MongoDBCliArgs {
    /// The connection string to the MongoDB server.
    #[arg(env = "MIGRATOR_MONGODB_CONNECTION_URL", long, global = true)]
    pub mongodb_connection_url: Option<String>,

    /// The name of the database to migrate.
    #[arg(env = "MIGRATOR_DATABASE_NAME", long, global = true)]
    pub mongodb_database_name: Option<String>,
}
