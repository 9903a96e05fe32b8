//! Request and response DTOs for the api-key surface.

use nimbus_core::UtcDateTime;
use nimbus_entities::types::ApiKeyValidity;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateApiKeyRequest {
    /// Function the key authorizes invocations of.
    pub function_id: Uuid,
    #[schema(example = "1w")]
    pub validity: ApiKeyValidity,
    #[schema(example = "ci-pipeline")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateApiKeyResponse {
    pub key_id: Uuid,
    /// The full key, returned exactly once.
    pub secret_key: String,
    pub name: String,
    pub validity: ApiKeyValidity,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_at: Option<UtcDateTime>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: UtcDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyResponse {
    pub key_id: Uuid,
    pub name: String,
    pub validity: ApiKeyValidity,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub expires_at: Option<UtcDateTime>,
    pub is_active: bool,
    /// Derived at read time from `expires_at`.
    pub expired: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: UtcDateTime,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub revoked_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_used_at: Option<UtcDateTime>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyListResponse {
    pub api_keys: Vec<ApiKeyResponse>,
    pub total: usize,
}
