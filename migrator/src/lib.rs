pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod migrations;
pub mod types;
pub mod utils;


// Re-export commonly used item
pub use error::{MigratorError, MigratorResult};
