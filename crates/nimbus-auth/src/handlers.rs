use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use nimbus_core::error_builder;
use nimbus_core::problemdetails::Problem;
use nimbus_database::FunctionStore;
use nimbus_entities::{functions, users};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::apikey_service::ApiKeyService;
use crate::handler_types::{
    ApiKeyListResponse, ApiKeyResponse, CreateApiKeyResponse, GenerateApiKeyRequest,
};
use crate::identity::RequireUser;

pub struct ApiKeyState {
    pub api_key_service: Arc<ApiKeyService>,
    pub functions: Arc<FunctionStore>,
}

impl ApiKeyState {
    /// Resolve a function by uuid and check the caller owns it.
    async fn owned_function(
        &self,
        uuid: Uuid,
        caller: &users::Model,
    ) -> Result<functions::Model, Problem> {
        let function = self
            .functions
            .find_by_uuid(uuid)
            .await
            .map_err(|e| nimbus_core::PlatformError::from(e).to_problem())?
            .ok_or_else(|| {
                error_builder::not_found()
                    .detail(format!("no function with id {uuid}"))
                    .build()
            })?;

        if function.owner_id != caller.id {
            return Err(error_builder::forbidden()
                .detail("this function belongs to another account")
                .build());
        }
        Ok(function)
    }

    /// Resolve a key by uuid and check the caller owns its function.
    async fn owned_key_function(
        &self,
        key_id: Uuid,
        caller: &users::Model,
    ) -> Result<(), Problem> {
        let key = self
            .api_key_service
            .find(key_id)
            .await
            .map_err(|e| e.to_problem())?;

        let function = self
            .functions
            .find_by_id(key.function_id)
            .await
            .map_err(|e| nimbus_core::PlatformError::from(e).to_problem())?
            .ok_or_else(|| {
                error_builder::not_found()
                    .detail("function for this key no longer exists")
                    .build()
            })?;

        if function.owner_id != caller.id {
            return Err(error_builder::forbidden()
                .detail("this api key belongs to another account")
                .build());
        }
        Ok(())
    }
}

#[utoipa::path(
    post,
    path = "/auth/apikey/generate",
    request_body = GenerateApiKeyRequest,
    responses(
        (status = 200, description = "API key created; the secret is returned only here", body = CreateApiKeyResponse),
        (status = 400, description = "Validation error"),
        (status = 403, description = "Function belongs to another account"),
        (status = 404, description = "Function not found")
    ),
    tag = "API Keys"
)]
pub async fn generate_api_key(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<ApiKeyState>>,
    Json(request): Json<GenerateApiKeyRequest>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(request.function_id, &caller).await?;

    match state
        .api_key_service
        .create_api_key(function.id, &request.name, request.validity)
        .await
    {
        Ok(created) => Ok(Json(created)),
        Err(e) => Err(e.to_problem()),
    }
}

#[utoipa::path(
    get,
    path = "/auth/apikey/{function_id}/list",
    params(
        ("function_id" = Uuid, Path, description = "Function uuid")
    ),
    responses(
        (status = 200, description = "Keys ordered active, disabled, expired", body = ApiKeyListResponse),
        (status = 403, description = "Function belongs to another account"),
        (status = 404, description = "Function not found")
    ),
    tag = "API Keys"
)]
pub async fn list_api_keys(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<ApiKeyState>>,
    Path(function_id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(function_id, &caller).await?;

    match state.api_key_service.list_api_keys(function.id).await {
        Ok(api_keys) => {
            let total = api_keys.len();
            Ok(Json(ApiKeyListResponse { api_keys, total }))
        }
        Err(e) => Err(e.to_problem()),
    }
}

#[utoipa::path(
    delete,
    path = "/auth/apikey/{key_id}/revoke",
    params(
        ("key_id" = Uuid, Path, description = "API key uuid")
    ),
    responses(
        (status = 200, description = "Key revoked", body = ApiKeyResponse),
        (status = 403, description = "Key belongs to another account"),
        (status = 404, description = "Key not found")
    ),
    tag = "API Keys"
)]
pub async fn revoke_api_key(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<ApiKeyState>>,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    state.owned_key_function(key_id, &caller).await?;

    match state.api_key_service.revoke(key_id).await {
        Ok(key) => Ok(Json(key)),
        Err(e) => Err(e.to_problem()),
    }
}

#[utoipa::path(
    put,
    path = "/auth/apikey/{key_id}/enable",
    params(
        ("key_id" = Uuid, Path, description = "API key uuid")
    ),
    responses(
        (status = 200, description = "Key re-enabled", body = ApiKeyResponse),
        (status = 403, description = "Key belongs to another account"),
        (status = 404, description = "Key not found"),
        (status = 409, description = "Key is expired and cannot be re-enabled")
    ),
    tag = "API Keys"
)]
pub async fn enable_api_key(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<ApiKeyState>>,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    state.owned_key_function(key_id, &caller).await?;

    match state.api_key_service.enable(key_id).await {
        Ok(key) => Ok(Json(key)),
        Err(e) => Err(e.to_problem()),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(generate_api_key, list_api_keys, revoke_api_key, enable_api_key),
    components(schemas(
        GenerateApiKeyRequest,
        CreateApiKeyResponse,
        ApiKeyResponse,
        ApiKeyListResponse,
    )),
    tags(
        (name = "API Keys", description = "Invocation credential management")
    )
)]
pub struct ApiKeyApiDoc;
