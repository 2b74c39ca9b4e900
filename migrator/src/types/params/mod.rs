pub mod database;
pub mod migration;

pub use database::DatabaseArgs;
pub use migration::MigrationSettings;
