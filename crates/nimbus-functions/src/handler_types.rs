//! Request and response DTOs for the `/functions` surface.

use nimbus_core::{FunctionLogEntry, UtcDateTime};
use nimbus_entities::invocations::RequestInfo;
use nimbus_entities::types::{DeploymentStatus, FunctionStatus, InvocationStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeployResponse {
    pub deployment_id: Uuid,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionResponse {
    pub id: Uuid,
    pub name: String,
    pub status: FunctionStatus,
    pub skip_signing: bool,
    pub timeout_ms: i64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: UtcDateTime,
}

impl From<nimbus_entities::functions::Model> for FunctionResponse {
    fn from(model: nimbus_entities::functions::Model) -> Self {
        Self {
            id: model.uuid,
            name: model.name,
            status: model.status,
            skip_signing: model.skip_signing,
            timeout_ms: model.timeout_ms,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeploymentResponse {
    pub id: Uuid,
    pub version: i32,
    pub image_tag: String,
    pub status: DeploymentStatus,
    /// Marks the live deployment.
    pub is_active: bool,
    pub build_logs: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub deployed_at: UtcDateTime,
}

impl From<nimbus_entities::deployments::Model> for DeploymentResponse {
    fn from(model: nimbus_entities::deployments::Model) -> Self {
        Self {
            id: model.uuid,
            version: model.version,
            image_tag: model.image_tag,
            status: model.status,
            is_active: model.is_active,
            build_logs: model.build_logs,
            deployed_at: model.deployed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RollbackRequest {
    pub deployment_uuid: Uuid,
}

/// Partial settings update; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateFunctionSettingsRequest {
    pub skip_signing: Option<bool>,
    #[schema(minimum = 100, maximum = 900000)]
    pub timeout_ms: Option<i64>,
}

/// A single function with its live deployment, if any.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionDetailResponse {
    #[serde(flatten)]
    pub function: FunctionResponse,
    pub active_deployment: Option<DeploymentResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvocationResponse {
    pub id: Uuid,
    pub status: InvocationStatus,
    pub success: bool,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub request_info: RequestInfo,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    pub logs: Vec<FunctionLogEntry>,
    #[schema(value_type = String, format = "date-time")]
    pub timestamp: UtcDateTime,
}

impl From<nimbus_entities::invocations::Model> for InvocationResponse {
    fn from(model: nimbus_entities::invocations::Model) -> Self {
        Self {
            id: model.uuid,
            status: model.status,
            success: model.success,
            duration_ms: model.duration_ms,
            error: model.error,
            request_info: model.request_info,
            result: model.result,
            logs: model.logs.logs,
            timestamp: model.created_at,
        }
    }
}

/// Aggregate invocation counters for one function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvocationStatsResponse {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Mean duration over the most recent invocations; absent with no
    /// history.
    pub avg_duration_ms: Option<i64>,
}

impl From<nimbus_database::InvocationStats> for InvocationStatsResponse {
    fn from(stats: nimbus_database::InvocationStats) -> Self {
        Self {
            total: stats.total,
            succeeded: stats.succeeded,
            failed: stats.failed,
            timed_out: stats.timed_out,
            avg_duration_ms: stats.avg_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionLogResponse {
    pub level: String,
    pub message: String,
    #[schema(value_type = String, format = "date-time")]
    pub timestamp: UtcDateTime,
}

impl From<nimbus_entities::function_logs::Model> for FunctionLogResponse {
    fn from(model: nimbus_entities::function_logs::Model) -> Self {
        Self {
            level: model.level,
            message: model.message,
            timestamp: model.created_at,
        }
    }
}
