pub use super::api_keys::Entity as ApiKeys;
pub use super::deployments::Entity as Deployments;
pub use super::function_logs::Entity as FunctionLogs;
pub use super::functions::Entity as Functions;
pub use super::invocations::Entity as Invocations;
pub use super::users::Entity as Users;

pub use super::types::{ApiKeyValidity, DeploymentStatus, FunctionStatus, InvocationStatus};
