//! Persistence layer: connection bootstrap and the narrow typed stores
//! the rest of the platform depends on.

pub mod connection;
pub mod stores;
pub mod test_utils;

pub use connection::{establish_connection, DbConnection};
pub use stores::{
    ApiKeyStore, DeploymentStore, FunctionLogStore, FunctionStore, InvocationRecord,
    InvocationStats, InvocationStore, StoreError, UserStore,
};
