use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use nimbus_core::error_builder::ErrorBuilder;
use nimbus_core::problemdetails::Problem;
use nimbus_database::{ApiKeyStore, StoreError};
use nimbus_entities::api_keys;
use nimbus_entities::types::ApiKeyValidity;
use thiserror::Error;
use uuid::Uuid;

use crate::handler_types::{ApiKeyResponse, CreateApiKeyResponse};
use crate::signature;

#[derive(Error, Debug)]
pub enum ApiKeyServiceError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for ApiKeyServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiKeyServiceError::NotFound(msg),
            StoreError::Conflict(msg) => ApiKeyServiceError::Conflict(msg),
            StoreError::Database(e) => ApiKeyServiceError::DatabaseError(e.to_string()),
        }
    }
}

impl ApiKeyServiceError {
    pub fn to_problem(&self) -> Problem {
        match self {
            ApiKeyServiceError::DatabaseError(e) => {
                ErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .type_("https://nimbus.dev/probs/database-error")
                    .title("Database Error")
                    .detail(format!("A database error occurred: {}", e))
                    .value("error_code", "DATABASE_ERROR")
                    .build()
            }
            ApiKeyServiceError::NotFound(msg) => ErrorBuilder::new(StatusCode::NOT_FOUND)
                .type_("https://nimbus.dev/probs/api-key-not-found")
                .title("API Key Not Found")
                .detail(msg.clone())
                .value("error_code", "API_KEY_NOT_FOUND")
                .build(),
            ApiKeyServiceError::ValidationError(msg) => ErrorBuilder::new(StatusCode::BAD_REQUEST)
                .type_("https://nimbus.dev/probs/validation-error")
                .title("Validation Error")
                .detail(msg.clone())
                .value("error_code", "VALIDATION_ERROR")
                .build(),
            ApiKeyServiceError::Conflict(msg) => ErrorBuilder::new(StatusCode::CONFLICT)
                .type_("https://nimbus.dev/probs/conflict")
                .title("Conflict")
                .detail(msg.clone())
                .value("error_code", "CONFLICT")
                .build(),
        }
    }
}

pub struct ApiKeyService {
    keys: Arc<ApiKeyStore>,
}

impl ApiKeyService {
    pub fn new(keys: Arc<ApiKeyStore>) -> Self {
        Self { keys }
    }

    /// Issue a key for a function. The cleartext secret is embedded in
    /// the returned `secret_key` and is never reproducible afterwards.
    pub async fn create_api_key(
        &self,
        function_id: i32,
        name: &str,
        validity: ApiKeyValidity,
    ) -> Result<CreateApiKeyResponse, ApiKeyServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiKeyServiceError::ValidationError(
                "key name must not be empty".to_string(),
            ));
        }
        if name.len() > 128 {
            return Err(ApiKeyServiceError::ValidationError(
                "key name must be at most 128 characters".to_string(),
            ));
        }

        let key_id = Uuid::new_v4();
        let secret = signature::generate_secret();
        let secret_hash = signature::hash_secret(key_id, &secret);

        let model = self
            .keys
            .create_with_uuid(key_id, function_id, name, validity, &secret_hash)
            .await?;

        Ok(CreateApiKeyResponse {
            key_id: model.uuid,
            secret_key: signature::format_key(key_id, &secret),
            name: model.name,
            validity: model.validity,
            expires_at: model.expires_at,
            created_at: model.created_at,
        })
    }

    pub async fn list_api_keys(
        &self,
        function_id: i32,
    ) -> Result<Vec<ApiKeyResponse>, ApiKeyServiceError> {
        let now = Utc::now();
        Ok(self
            .keys
            .list_for_function(function_id)
            .await?
            .into_iter()
            .map(|model| to_response(model, now))
            .collect())
    }

    pub async fn find(&self, key_id: Uuid) -> Result<api_keys::Model, ApiKeyServiceError> {
        self.keys
            .find_by_uuid(key_id)
            .await?
            .ok_or_else(|| ApiKeyServiceError::NotFound(format!("api key {key_id}")))
    }

    pub async fn revoke(&self, key_id: Uuid) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        let model = self.keys.revoke(key_id).await?;
        Ok(to_response(model, Utc::now()))
    }

    pub async fn enable(&self, key_id: Uuid) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        let model = self.keys.enable(key_id).await?;
        Ok(to_response(model, Utc::now()))
    }
}

fn to_response(model: api_keys::Model, now: nimbus_core::UtcDateTime) -> ApiKeyResponse {
    let expired = model.expires_at.map(|e| e <= now).unwrap_or(false);
    ApiKeyResponse {
        key_id: model.uuid,
        name: model.name,
        validity: model.validity,
        expires_at: model.expires_at,
        is_active: model.is_active,
        expired,
        created_at: model.created_at,
        revoked_at: model.revoked_at,
        last_used_at: model.last_used_at,
    }
}
