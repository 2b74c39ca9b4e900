// Client abstractions module - the store driver and the lock built on top of it

pub mod database;
pub mod lock;

// Re-export commonly used types
#[cfg(test)]
pub use database::memory::MemoryStore;
pub use database::{mongodb::MongoStore, MigrationStore};
pub use lock::{LockManager, UpgradeLock};
