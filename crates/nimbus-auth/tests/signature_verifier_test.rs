//! End-to-end checks of the signed-invocation scheme against a real
//! (sqlite) key store: issue, sign, verify, replay window, revocation,
//! and the skip-signing bypass.

use std::sync::Arc;

use chrono::Utc;
use nimbus_auth::apikey_service::ApiKeyService;
use nimbus_auth::signature::{self, SignatureVerifier, SignedHeaders};
use nimbus_core::PlatformError;
use nimbus_database::test_utils::{seed_function, seed_user, test_db};
use nimbus_database::ApiKeyStore;
use nimbus_entities::types::ApiKeyValidity;

struct Setup {
    db: Arc<nimbus_database::DbConnection>,
    verifier: SignatureVerifier,
    service: ApiKeyService,
    function: nimbus_entities::functions::Model,
    store: Arc<ApiKeyStore>,
}

async fn setup() -> Setup {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = Arc::new(ApiKeyStore::new(db.clone()));
    Setup {
        db,
        verifier: SignatureVerifier::new(store.clone()),
        service: ApiKeyService::new(store.clone()),
        function,
        store,
    }
}

/// Force a key's expiry into the past through the entity layer.
async fn backdate_expiry(setup: &Setup, key_id: uuid::Uuid) {
    use sea_orm::{ActiveModelTrait, Set};
    let model = setup.store.find_by_uuid(key_id).await.unwrap().unwrap();
    let mut active: nimbus_entities::api_keys::ActiveModel = model.into();
    active.expires_at = Set(Some(Utc::now() - chrono::Duration::hours(1)));
    active.update(setup.db.as_ref()).await.unwrap();
}

fn headers_for(secret_key: &str, body: &serde_json::Value, timestamp: i64) -> SignedHeaders {
    let (_, secret) = signature::parse_key(secret_key).unwrap();
    let payload = signature::canonical_payload(body);
    SignedHeaders {
        api_key: secret_key.to_string(),
        signature: signature::sign(secret, &payload, timestamp),
        timestamp,
    }
}

#[tokio::test]
async fn issued_key_verifies_within_validity() {
    let s = setup().await;
    let created = s
        .service
        .create_api_key(s.function.id, "ci", ApiKeyValidity::OneDay)
        .await
        .unwrap();

    let body = serde_json::json!({"x": "hi"});
    let headers = headers_for(&created.secret_key, &body, Utc::now().timestamp());

    let record = s
        .verifier
        .verify(&s.function, Some(&headers), &body)
        .await
        .unwrap();
    assert!(record.signed);
    assert_eq!(record.key_id, Some(created.key_id));

    // Usage is stamped out of band shortly after verification.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let stamped = s.store.find_by_uuid(created.key_id).await.unwrap().unwrap();
    assert!(stamped.last_used_at.is_some());
}

#[tokio::test]
async fn replayed_timestamp_outside_window_is_rejected() {
    let s = setup().await;
    let created = s
        .service
        .create_api_key(s.function.id, "ci", ApiKeyValidity::OneDay)
        .await
        .unwrap();

    let body = serde_json::json!({"x": "hi"});
    // A capture replayed six minutes later: correct signature, stale clock.
    let stale = Utc::now().timestamp() - 360;
    let headers = headers_for(&created.secret_key, &body, stale);

    let err = s
        .verifier
        .verify(&s.function, Some(&headers), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let s = setup().await;
    let created = s
        .service
        .create_api_key(s.function.id, "ci", ApiKeyValidity::OneDay)
        .await
        .unwrap();

    let signed_body = serde_json::json!({"amount": 10});
    let headers = headers_for(&created.secret_key, &signed_body, Utc::now().timestamp());

    let tampered = serde_json::json!({"amount": 10000});
    let err = s
        .verifier
        .verify(&s.function, Some(&headers), &tampered)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));
}

#[tokio::test]
async fn revoked_key_never_verifies_again() {
    let s = setup().await;
    let created = s
        .service
        .create_api_key(s.function.id, "ci", ApiKeyValidity::OneDay)
        .await
        .unwrap();

    s.service.revoke(created.key_id).await.unwrap();

    let body = serde_json::json!({});
    let headers = headers_for(&created.secret_key, &body, Utc::now().timestamp());
    let err = s
        .verifier
        .verify(&s.function, Some(&headers), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));
}

#[tokio::test]
async fn expired_key_never_verifies_and_cannot_be_enabled() {
    let s = setup().await;
    let created = s
        .service
        .create_api_key(s.function.id, "ci", ApiKeyValidity::OneHour)
        .await
        .unwrap();
    backdate_expiry(&s, created.key_id).await;

    // A correct signature does not help once the key is expired.
    let body = serde_json::json!({});
    let headers = headers_for(&created.secret_key, &body, Utc::now().timestamp());
    let err = s
        .verifier
        .verify(&s.function, Some(&headers), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));

    // Re-enabling is refused; the expiry was fixed at creation.
    let err = s.service.enable(created.key_id).await.unwrap_err();
    assert!(matches!(
        err,
        nimbus_auth::ApiKeyServiceError::Conflict(_)
    ));
}

#[tokio::test]
async fn keys_for_other_functions_are_rejected() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function_a = seed_function(&db, user.id, "a").await;
    let function_b = seed_function(&db, user.id, "b").await;
    let store = Arc::new(ApiKeyStore::new(db.clone()));
    let verifier = SignatureVerifier::new(store.clone());
    let service = ApiKeyService::new(store);

    let created = service
        .create_api_key(function_a.id, "ci", ApiKeyValidity::OneDay)
        .await
        .unwrap();

    let body = serde_json::json!({});
    let headers = headers_for(&created.secret_key, &body, Utc::now().timestamp());

    let err = verifier
        .verify(&function_b, Some(&headers), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));
}

#[tokio::test]
async fn skip_signing_functions_bypass_but_are_marked_unsigned() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let mut function = seed_function(&db, user.id, "open").await;
    function.skip_signing = true;
    let store = Arc::new(ApiKeyStore::new(db.clone()));
    let verifier = SignatureVerifier::new(store);

    let record = verifier
        .verify(&function, None, &serde_json::json!({}))
        .await
        .unwrap();
    assert!(!record.signed);
    assert!(record.key_id.is_none());
}

#[tokio::test]
async fn missing_headers_on_signed_function_are_rejected() {
    let s = setup().await;
    let err = s
        .verifier
        .verify(&s.function, None, &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SignatureInvalid(_)));
}
