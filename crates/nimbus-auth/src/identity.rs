//! Caller identity for the management surface.
//!
//! User registration and session tokens live in the external auth layer;
//! by the time a request reaches this core it carries an `X-User-Id`
//! header with the caller's uuid. The identity middleware resolves (and
//! on first sight mirrors) the user row and caches it on the request;
//! handlers take it through the `RequireUser` extractor.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use nimbus_core::error_builder::ErrorBuilder;
use nimbus_core::problemdetails::Problem;
use nimbus_database::UserStore;
use nimbus_entities::users;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Resolve the calling user and stash the row in request extensions.
pub async fn resolve_identity(users: Arc<UserStore>, mut req: Request, next: Next) -> Response {
    let Some(user_id) = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
    else {
        return unauthorized("missing or malformed X-User-Id header").into_response();
    };

    let email = req
        .headers()
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}@users.nimbus.local", user_id.simple()));

    let user = match users
        .find_or_create(user_id, &email, email.split('@').next().unwrap_or("user"))
        .await
    {
        Ok(user) => user,
        Err(e) => {
            return ErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
                .type_("https://nimbus.dev/probs/internal-server-error")
                .title("Internal Server Error")
                .detail(format!("failed to resolve caller: {e}"))
                .value("error_code", "INTERNAL_SERVER_ERROR")
                .build()
                .into_response();
        }
    };

    req.extensions_mut().insert(user);
    next.run(req).await
}

fn unauthorized(detail: &str) -> Problem {
    ErrorBuilder::new(StatusCode::UNAUTHORIZED)
        .type_("https://nimbus.dev/probs/unauthorized")
        .title("Unauthorized")
        .detail(detail.to_string())
        .value("error_code", "UNAUTHORIZED")
        .build()
}

/// Extractor for the resolved caller.
pub struct RequireUser(pub users::Model);

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = Problem;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<users::Model>()
            .cloned()
            .map(RequireUser)
            .ok_or_else(|| unauthorized("request reached a handler without a resolved caller"))
    }
}
