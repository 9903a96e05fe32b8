use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use nimbus_auth::identity::RequireUser;
use nimbus_auth::signature::{SignatureVerifier, SignedHeaders};
use nimbus_core::error_builder;
use nimbus_core::problemdetails::Problem;
use nimbus_core::validation::CachedBody;
use nimbus_core::{PlatformConfig, PlatformError, RequestEnvelope};
use nimbus_database::{DeploymentStore, FunctionLogStore, FunctionStore, InvocationStore};
use nimbus_entities::{functions, users};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::deploy::DeploymentService;
use crate::handler_types::{
    DeployResponse, DeploymentResponse, FunctionDetailResponse, FunctionLogResponse,
    FunctionResponse, InvocationResponse, InvocationStatsResponse, RollbackRequest,
    UpdateFunctionSettingsRequest,
};
use crate::invoke::InvocationEngine;

/// How many rows the read endpoints return.
const LIST_LIMIT: u64 = 100;

pub struct FunctionsState {
    pub functions: Arc<FunctionStore>,
    pub deployments: Arc<DeploymentStore>,
    pub invocations: Arc<InvocationStore>,
    pub logs: Arc<FunctionLogStore>,
    pub deploy_service: Arc<DeploymentService>,
    pub engine: Arc<InvocationEngine>,
    pub verifier: Arc<SignatureVerifier>,
    pub config: Arc<PlatformConfig>,
}

impl FunctionsState {
    async fn owned_function(
        &self,
        uuid: Uuid,
        caller: &users::Model,
    ) -> Result<functions::Model, Problem> {
        let function = self
            .functions
            .find_by_uuid(uuid)
            .await
            .map_err(|e| PlatformError::from(e).to_problem())?
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
}

#[utoipa::path(
    post,
    path = "/functions/deploy",
    request_body(content = String, content_type = "multipart/form-data", description = "Fields: `name` (function name), `archive` (tar.gz)"),
    responses(
        (status = 200, description = "Deployed and activated", body = DeployResponse),
        (status = 400, description = "Invalid archive"),
        (status = 502, description = "Image build failed"),
        (status = 503, description = "Container runtime unavailable")
    ),
    tag = "Functions"
)]
pub async fn deploy_function(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Problem> {
    let mut name: Option<String> = None;
    let mut archive: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error_builder::bad_request()
            .detail(format!("malformed multipart body: {e}"))
            .value("error_code", "INVALID_ARCHIVE")
            .build()
    })? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(|e| {
                    error_builder::bad_request()
                        .detail(format!("unreadable name field: {e}"))
                        .build()
                })?);
            }
            Some("archive") => {
                archive = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            error_builder::bad_request()
                                .detail(format!("unreadable archive field: {e}"))
                                .value("error_code", "INVALID_ARCHIVE")
                                .build()
                        })?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let name = name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
        error_builder::bad_request()
            .detail("missing 'name' field")
            .build()
    })?;
    let archive = archive.ok_or_else(|| {
        error_builder::bad_request()
            .detail("missing 'archive' field")
            .value("error_code", "INVALID_ARCHIVE")
            .build()
    })?;

    if archive.len() as u64 > state.config.max_request_size_bytes() {
        return Err(PlatformError::InvalidArchive(format!(
            "archive exceeds the {} MB limit",
            state.config.function_max_request_size_mb
        ))
        .to_problem());
    }

    let function = match state
        .functions
        .find_by_owner_and_name(caller.id, name.trim())
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?
    {
        Some(existing) => existing,
        None => state
            .functions
            .create(
                caller.id,
                name.trim(),
                false,
                state.config.function_timeout_ms() as i64,
            )
            .await
            .map_err(|e| PlatformError::from(e).to_problem())?,
    };

    let outcome = state
        .deploy_service
        .deploy(&function, &archive)
        .await
        .map_err(|e| e.to_problem())?;

    Ok(Json(DeployResponse {
        deployment_id: outcome.deployment_uuid,
        version: outcome.version,
    }))
}

#[utoipa::path(
    get,
    path = "/functions",
    responses(
        (status = 200, description = "The caller's functions", body = [FunctionResponse])
    ),
    tag = "Functions"
)]
pub async fn list_functions(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
) -> Result<impl IntoResponse, Problem> {
    let functions = state
        .functions
        .list_for_owner(caller.id)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(
        functions
            .into_iter()
            .map(FunctionResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/functions/{uuid}",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 200, description = "The function and its live deployment", body = FunctionDetailResponse),
        (status = 403, description = "Function belongs to another account"),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn get_function(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let active = state
        .deployments
        .find_active(function.id)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(FunctionDetailResponse {
        function: FunctionResponse::from(function),
        active_deployment: active.map(DeploymentResponse::from),
    }))
}

#[utoipa::path(
    put,
    path = "/functions/{uuid}/settings",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    request_body = UpdateFunctionSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = FunctionResponse),
        (status = 400, description = "Timeout outside the accepted range"),
        (status = 403, description = "Function belongs to another account"),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn update_function_settings(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
    Json(request): Json<UpdateFunctionSettingsRequest>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;

    if let Some(timeout_ms) = request.timeout_ms {
        if !(100..=900_000).contains(&timeout_ms) {
            return Err(error_builder::bad_request()
                .detail("timeout_ms must be between 100 and 900000")
                .build());
        }
    }

    let updated = state
        .functions
        .update_settings(function.id, request.skip_signing, request.timeout_ms)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(FunctionResponse::from(updated)))
}

#[utoipa::path(
    delete,
    path = "/functions/{uuid}",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 204, description = "Function soft-deleted, images scheduled for removal"),
        (status = 403, description = "Function belongs to another account"),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn delete_function(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    state
        .deploy_service
        .delete_function(&function)
        .await
        .map_err(|e| e.to_problem())?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/functions/{uuid}/deployments",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 200, description = "Deployments, newest version first", body = [DeploymentResponse]),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn list_deployments(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let deployments = state
        .deployments
        .list_for_function(function.id)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(
        deployments
            .into_iter()
            .map(DeploymentResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    post,
    path = "/functions/{uuid}/rollback",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    request_body = RollbackRequest,
    responses(
        (status = 200, description = "Active pointer flipped", body = DeploymentResponse),
        (status = 404, description = "Function or deployment not found"),
        (status = 409, description = "Deployment is not in a ready state")
    ),
    tag = "Functions"
)]
pub async fn rollback_function(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
    Json(request): Json<RollbackRequest>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let deployment = state
        .deploy_service
        .rollback(&function, request.deployment_uuid)
        .await
        .map_err(|e| e.to_problem())?;

    Ok(Json(DeploymentResponse::from(deployment)))
}

#[utoipa::path(
    post,
    path = "/functions/{uuid}/invoke",
    params(
        ("uuid" = Uuid, Path, description = "Function uuid"),
        ("X-Api-Key" = Option<String>, Header, description = "Key in nk_<id>.<secret> form; required unless the function skips signing"),
        ("X-Signature" = Option<String>, Header, description = "base64(HMAC-SHA256(secret, payload.timestamp))"),
        ("X-Timestamp" = Option<i64>, Header, description = "Unix seconds, within a 5 minute window")
    ),
    request_body = RequestEnvelope,
    responses(
        (status = 200, description = "The function's response, verbatim"),
        (status = 403, description = "Signature rejected"),
        (status = 404, description = "Function not found or unavailable"),
        (status = 500, description = "Function failed"),
        (status = 503, description = "Overloaded or runtime down"),
        (status = 504, description = "Function timed out")
    ),
    tag = "Functions"
)]
pub async fn invoke_function(
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
    Extension(cached): Extension<CachedBody>,
    headers: axum::http::HeaderMap,
) -> Result<Response, Problem> {
    let function = state
        .functions
        .find_by_uuid(uuid)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?
        .ok_or_else(|| {
            PlatformError::NotFound(format!("no function with id {uuid}")).to_problem()
        })?;

    let body_value = cached.value();
    let mut envelope: RequestEnvelope = if body_value.is_null() {
        RequestEnvelope::default()
    } else {
        serde_json::from_value(body_value).map_err(|e| {
            error_builder::bad_request()
                .detail(format!("malformed request envelope: {e}"))
                .build()
        })?
    };

    let signed_headers = extract_signed_headers(&headers);
    let record = state
        .verifier
        .verify(&function, signed_headers.as_ref(), &envelope.body)
        .await
        .map_err(|e| e.to_problem())?;

    // The record travels with the request metadata so invocation rows
    // show whether the call was signed.
    envelope.headers.insert(
        "x-nimbus-signed".to_string(),
        record.signed.to_string(),
    );

    let outcome = state
        .engine
        .invoke(&function, envelope)
        .await
        .map_err(|e| e.to_problem())?;

    // Relay the function's response verbatim.
    let mut response = Response::builder()
        .status(StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::OK));
    {
        let headers_mut = response.headers_mut().expect("fresh response builder");
        headers_mut.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in &outcome.headers {
            if let (Ok(name), Ok(value)) = (
                key.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                headers_mut.insert(name, value);
            }
        }
    }
    let body = serde_json::to_vec(&outcome.body).unwrap_or_else(|_| b"null".to_vec());
    Ok(response
        .body(Body::from(body))
        .expect("response assembly cannot fail"))
}

fn extract_signed_headers(headers: &axum::http::HeaderMap) -> Option<SignedHeaders> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let api_key = get("x-api-key")?;
    let signature = get("x-signature")?;
    let timestamp = get("x-timestamp")?.parse::<i64>().ok()?;
    Some(SignedHeaders {
        api_key,
        signature,
        timestamp,
    })
}

#[utoipa::path(
    get,
    path = "/functions/{uuid}/invocations",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 200, description = "Recent invocations, newest first", body = [InvocationResponse]),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn list_invocations(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let invocations = state
        .invocations
        .list_for_function(function.id, LIST_LIMIT)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(
        invocations
            .into_iter()
            .map(InvocationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/functions/{uuid}/logs",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 200, description = "Recent log lines, newest first", body = [FunctionLogResponse]),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn list_logs(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let logs = state
        .logs
        .list_for_function(function.id, LIST_LIMIT)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(
        logs.into_iter()
            .map(FunctionLogResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/functions/{uuid}/stats",
    params(("uuid" = Uuid, Path, description = "Function uuid")),
    responses(
        (status = 200, description = "Aggregate invocation counters", body = InvocationStatsResponse),
        (status = 404, description = "Function not found")
    ),
    tag = "Functions"
)]
pub async fn function_stats(
    RequireUser(caller): RequireUser,
    State(state): State<Arc<FunctionsState>>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let function = state.owned_function(uuid, &caller).await?;
    let stats = state
        .invocations
        .stats_for_function(function.id, LIST_LIMIT)
        .await
        .map_err(|e| PlatformError::from(e).to_problem())?;

    Ok(Json(InvocationStatsResponse::from(stats)))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        deploy_function,
        list_functions,
        get_function,
        update_function_settings,
        delete_function,
        list_deployments,
        rollback_function,
        invoke_function,
        list_invocations,
        list_logs,
        function_stats,
    ),
    components(schemas(
        DeployResponse,
        FunctionResponse,
        FunctionDetailResponse,
        UpdateFunctionSettingsRequest,
        DeploymentResponse,
        RollbackRequest,
        InvocationResponse,
        InvocationStatsResponse,
        FunctionLogResponse,
        RequestEnvelope,
    )),
    tags(
        (name = "Functions", description = "Function deployment and invocation")
    )
)]
pub struct FunctionsApiDoc;
