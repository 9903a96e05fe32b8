//! Platform-wide error kinds and their HTTP mapping

use crate::error_builder::ErrorBuilder;
use crate::problemdetails::Problem;
use axum::http::StatusCode;
use thiserror::Error;

/// The error kinds the platform surfaces at its HTTP boundary.
///
/// Port and store errors are translated into these kinds by the services
/// that own them; handlers only ever convert a `PlatformError` into a
/// problem response.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Function unavailable: {0}")]
    FunctionUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Too many concurrent invocations")]
    Overloaded,

    #[error("Function timed out after {0} ms")]
    Timeout(u64),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PlatformError::InvalidArchive(_) => StatusCode::BAD_REQUEST,
            PlatformError::Unauthorized(_) | PlatformError::SignatureInvalid(_) => {
                StatusCode::FORBIDDEN
            }
            PlatformError::NotFound(_) | PlatformError::FunctionUnavailable(_) => {
                StatusCode::NOT_FOUND
            }
            PlatformError::Overloaded | PlatformError::RuntimeUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PlatformError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PlatformError::BuildFailed(_) => StatusCode::BAD_GATEWAY,
            PlatformError::StoreConflict(_) => StatusCode::CONFLICT,
            PlatformError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PlatformError::InvalidArchive(_) => "INVALID_ARCHIVE",
            PlatformError::BuildFailed(_) => "BUILD_FAILED",
            PlatformError::FunctionUnavailable(_) => "FUNCTION_UNAVAILABLE",
            PlatformError::NotFound(_) => "NOT_FOUND",
            PlatformError::Unauthorized(_) => "UNAUTHORIZED",
            PlatformError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            PlatformError::Overloaded => "OVERLOADED",
            PlatformError::Timeout(_) => "TIMEOUT",
            PlatformError::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            PlatformError::StoreConflict(_) => "STORE_CONFLICT",
            PlatformError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_problem(&self) -> Problem {
        let slug = self.error_code().to_lowercase().replace('_', "-");
        ErrorBuilder::new(self.status_code())
            .type_(format!("https://nimbus.dev/probs/{slug}"))
            .title(self.title())
            .detail(self.to_string())
            .value("error_code", self.error_code())
            .build()
    }

    fn title(&self) -> &'static str {
        match self {
            PlatformError::InvalidArchive(_) => "Invalid Archive",
            PlatformError::BuildFailed(_) => "Build Failed",
            PlatformError::FunctionUnavailable(_) => "Function Unavailable",
            PlatformError::NotFound(_) => "Not Found",
            PlatformError::Unauthorized(_) => "Unauthorized",
            PlatformError::SignatureInvalid(_) => "Signature Invalid",
            PlatformError::Overloaded => "Overloaded",
            PlatformError::Timeout(_) => "Timeout",
            PlatformError::RuntimeUnavailable(_) => "Runtime Unavailable",
            PlatformError::StoreConflict(_) => "Conflict",
            PlatformError::Internal(_) => "Internal Server Error",
        }
    }
}

impl axum::response::IntoResponse for PlatformError {
    fn into_response(self) -> axum::response::Response {
        self.to_problem().into_response()
    }
}

/// Result type alias for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_spec_status_codes() {
        assert_eq!(
            PlatformError::InvalidArchive("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PlatformError::SignatureInvalid("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PlatformError::FunctionUnavailable("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PlatformError::Overloaded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PlatformError::Timeout(1000).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            PlatformError::BuildFailed("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            PlatformError::StoreConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn problem_carries_error_code() {
        let problem = PlatformError::Overloaded.to_problem();
        assert_eq!(problem.body["error_code"], "OVERLOADED");
        assert_eq!(
            problem.body["type"],
            "https://nimbus.dev/probs/overloaded"
        );
    }
}
