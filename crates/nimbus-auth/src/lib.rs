//! Invocation credentials: api-key issuance and the HMAC
//! signed-invocation scheme, plus caller identity resolution for the
//! management surface.

pub mod apikey_service;
pub mod handler_types;
pub mod handlers;
pub mod identity;
pub mod plugin;
pub mod signature;

pub use apikey_service::{ApiKeyService, ApiKeyServiceError};
pub use identity::{resolve_identity, RequireUser};
pub use plugin::ApiKeyPlugin;
pub use signature::{SignatureVerifier, SignedHeaders, VerificationRecord};
