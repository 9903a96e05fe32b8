//! Schema-driven request validation middleware.
//!
//! Rules are declared next to the route they protect and evaluated in one
//! pass; the body is read exactly once, cached on the request extensions,
//! and handed back to downstream extractors untouched. All failing rules
//! are reported together in a single 400 problem response.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{RawPathParams, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error_builder::ErrorBuilder;

/// Where a validated field is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Body,
    Query,
    Path,
}

/// The shape a field must satisfy.
#[derive(Debug, Clone)]
pub enum FieldSchema {
    String { min_len: usize, max_len: usize },
    Uuid,
    Integer { min: i64, max: i64 },
    Boolean,
    Object,
    OneOf(&'static [&'static str]),
}

/// One declarative rule over the request surface.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub field: &'static str,
    pub source: Source,
    pub schema: FieldSchema,
    pub required: bool,
}

impl ValidationRule {
    pub fn required(field: &'static str, source: Source, schema: FieldSchema) -> Self {
        Self {
            field,
            source,
            schema,
            required: true,
        }
    }

    pub fn optional(field: &'static str, source: Source, schema: FieldSchema) -> Self {
        Self {
            field,
            source,
            schema,
            required: false,
        }
    }
}

/// A single rule failure, reported to the client.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    #[schema(value_type = String)]
    pub source: Source,
    pub message: String,
}

/// The request body, read once by the validation middleware and shared
/// with every downstream consumer.
#[derive(Debug, Clone, Default)]
pub struct CachedBody {
    pub raw: Bytes,
    pub json: Option<Value>,
}

impl CachedBody {
    /// The parsed body, with an absent or empty body reading as JSON null.
    pub fn value(&self) -> Value {
        self.json.clone().unwrap_or(Value::Null)
    }
}

/// Validate a request against `rules`; meant to be wrapped in
/// `axum::middleware::from_fn` per route group.
pub async fn validate_request(
    rules: Arc<Vec<ValidationRule>>,
    params: RawPathParams,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ErrorBuilder::new(StatusCode::BAD_REQUEST)
                .type_("https://nimbus.dev/probs/validation-error")
                .title("Validation Error")
                .detail(format!("failed to read request body: {e}"))
                .value("error_code", "VALIDATION_ERROR")
                .build()
                .into_response();
        }
    };

    let json = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                return ErrorBuilder::new(StatusCode::BAD_REQUEST)
                    .type_("https://nimbus.dev/probs/validation-error")
                    .title("Validation Error")
                    .detail(format!("request body is not valid JSON: {e}"))
                    .value("error_code", "VALIDATION_ERROR")
                    .build()
                    .into_response();
            }
        }
    };

    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(parse_query)
        .unwrap_or_default();
    let path_params: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let cached = CachedBody {
        raw: bytes.clone(),
        json,
    };

    let mut errors = Vec::new();
    for rule in rules.iter() {
        check_rule(rule, &cached, &query, &path_params, &mut errors);
    }

    if !errors.is_empty() {
        return ErrorBuilder::new(StatusCode::BAD_REQUEST)
            .type_("https://nimbus.dev/probs/validation-error")
            .title("Validation Error")
            .detail(format!("{} field(s) failed validation", errors.len()))
            .value("error_code", "VALIDATION_ERROR")
            .value("errors", errors)
            .build()
            .into_response();
    }

    parts.extensions.insert(cached);
    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn check_rule(
    rule: &ValidationRule,
    body: &CachedBody,
    query: &BTreeMap<String, String>,
    path_params: &BTreeMap<String, String>,
    errors: &mut Vec<FieldError>,
) {
    let value: Option<Value> = match rule.source {
        Source::Body => body
            .json
            .as_ref()
            .and_then(|v| v.get(rule.field))
            .cloned()
            .filter(|v| !v.is_null()),
        Source::Query => query.get(rule.field).cloned().map(Value::String),
        Source::Path => path_params.get(rule.field).cloned().map(Value::String),
    };

    let Some(value) = value else {
        if rule.required {
            errors.push(FieldError {
                field: rule.field.to_string(),
                source: rule.source,
                message: "field is required".to_string(),
            });
        }
        return;
    };

    if let Err(message) = check_schema(&rule.schema, &value) {
        errors.push(FieldError {
            field: rule.field.to_string(),
            source: rule.source,
            message,
        });
    }
}

fn check_schema(schema: &FieldSchema, value: &Value) -> Result<(), String> {
    match schema {
        FieldSchema::String { min_len, max_len } => {
            let s = value
                .as_str()
                .ok_or_else(|| "expected a string".to_string())?;
            if s.len() < *min_len {
                return Err(format!("must be at least {min_len} characters"));
            }
            if s.len() > *max_len {
                return Err(format!("must be at most {max_len} characters"));
            }
            Ok(())
        }
        FieldSchema::Uuid => {
            let s = value
                .as_str()
                .ok_or_else(|| "expected a string".to_string())?;
            uuid::Uuid::parse_str(s)
                .map(|_| ())
                .map_err(|_| "must be a valid UUID".to_string())
        }
        FieldSchema::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| "expected an integer".to_string())?;
            if n < *min || n > *max {
                return Err(format!("must be between {min} and {max}"));
            }
            Ok(())
        }
        FieldSchema::Boolean => match value {
            Value::Bool(_) => Ok(()),
            Value::String(s) if s == "true" || s == "false" => Ok(()),
            _ => Err("expected a boolean".to_string()),
        },
        FieldSchema::Object => {
            if value.is_object() {
                Ok(())
            } else {
                Err("expected an object".to_string())
            }
        }
        FieldSchema::OneOf(allowed) => {
            let s = value
                .as_str()
                .ok_or_else(|| "expected a string".to_string())?;
            if allowed.contains(&s) {
                Ok(())
            } else {
                Err(format!("must be one of: {}", allowed.join(", ")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::from_fn;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn test_router(rules: Vec<ValidationRule>) -> Router {
        let rules = Arc::new(rules);
        Router::new()
            .route(
                "/functions/{uuid}/invoke",
                post(|req: Request| async move {
                    // The cached body must be present downstream.
                    assert!(req.extensions().get::<CachedBody>().is_some());
                    StatusCode::OK
                }),
            )
            .layer(from_fn(move |params: RawPathParams, req, next| {
                validate_request(rules.clone(), params, req, next)
            }))
    }

    fn invoke_request(uuid: &str, body: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(format!("/functions/{uuid}/invoke"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn all_failures_reported_together() {
        let router = test_router(vec![
            ValidationRule::required("uuid", Source::Path, FieldSchema::Uuid),
            ValidationRule::required(
                "method",
                Source::Body,
                FieldSchema::OneOf(&["GET", "POST"]),
            ),
            ValidationRule::required("path", Source::Body, FieldSchema::String {
                min_len: 1,
                max_len: 2048,
            }),
        ]);

        let response = router
            .oneshot(invoke_request("not-a-uuid", r#"{"method":"TELEPORT"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let problem: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["errors"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn valid_request_passes_with_cached_body() {
        let router = test_router(vec![
            ValidationRule::required("uuid", Source::Path, FieldSchema::Uuid),
            ValidationRule::optional("method", Source::Body, FieldSchema::OneOf(&["GET", "POST"])),
        ]);

        let response = router
            .oneshot(invoke_request(
                "7f1a1ab3-52a8-4b61-9a47-3a1aa1af3c9e",
                r#"{"method":"POST","body":{"x":"hi"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_body_is_rejected() {
        let router = test_router(vec![]);
        let response = router
            .oneshot(invoke_request(
                "7f1a1ab3-52a8-4b61-9a47-3a1aa1af3c9e",
                "{not json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn schema_checks() {
        assert!(check_schema(
            &FieldSchema::String {
                min_len: 1,
                max_len: 10
            },
            &Value::String("ok".into())
        )
        .is_ok());
        assert!(check_schema(&FieldSchema::Integer { min: 0, max: 10 }, &serde_json::json!(11))
            .is_err());
        assert!(check_schema(&FieldSchema::Boolean, &serde_json::json!(true)).is_ok());
        assert!(check_schema(&FieldSchema::Object, &serde_json::json!({"a": 1})).is_ok());
        assert!(check_schema(&FieldSchema::Object, &serde_json::json!([1])).is_err());
    }

    #[test]
    fn query_parsing_handles_flags_and_pairs() {
        let parsed = parse_query("a=1&flag&b=two");
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["flag"], "");
        assert_eq!(parsed["b"], "two");
    }
}
