pub mod api_keys;
pub mod deployments;
pub mod function_logs;
pub mod functions;
pub mod invocations;
pub mod types;
pub mod users;

pub mod prelude;
