//! Narrow typed stores over the database connection.
//!
//! Each entity gets its own store with the handful of operations the
//! platform actually performs. Multi-statement invariants (the active
//! deployment flip, version allocation) live here, inside transactions,
//! so no caller can hold them wrong.

mod api_keys;
mod deployments;
mod function_logs;
mod functions;
mod invocations;
mod users;

pub use api_keys::ApiKeyStore;
pub use deployments::DeploymentStore;
pub use function_logs::FunctionLogStore;
pub use functions::FunctionStore;
pub use invocations::{InvocationRecord, InvocationStats, InvocationStore};
pub use users::UserStore;

use sea_orm::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Connection(db) => StoreError::Database(db),
            TransactionError::Transaction(inner) => inner,
        }
    }
}

impl From<StoreError> for nimbus_core::PlatformError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => nimbus_core::PlatformError::NotFound(msg),
            StoreError::Conflict(msg) => nimbus_core::PlatformError::StoreConflict(msg),
            StoreError::Database(e) => {
                nimbus_core::PlatformError::Internal(format!("database error: {e}"))
            }
        }
    }
}
