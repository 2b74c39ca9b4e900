use thiserror::Error;

use crate::core::client::database::DatabaseError;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Database error while handling the upgrade lock: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// The record was no longer locked at the expected version when the holder tried to commit
    #[error("Upgrade lock for version {0} was lost before the version could be committed")]
    LockLost(u32),
}
