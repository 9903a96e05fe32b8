//! Store-level tests for the persistence invariants: version
//! monotonicity, the single-active-deployment flip, api-key lifecycle,
//! and append-only invocation rows.

use nimbus_database::test_utils::{seed_function, seed_user, test_db};
use nimbus_database::{ApiKeyStore, DeploymentStore, FunctionStore, InvocationStore, StoreError};
use nimbus_entities::invocations::{InvocationLogs, RequestInfo};
use nimbus_entities::types::{ApiKeyValidity, DeploymentStatus, FunctionStatus, InvocationStatus};
use nimbus_database::stores::InvocationRecord;
use uuid::Uuid;

#[tokio::test]
async fn versions_are_contiguous_and_never_reused() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = DeploymentStore::new(db.clone());

    let d1 = store.create_building(function.id, "archives/a1").await.unwrap();
    let d2 = store.create_building(function.id, "archives/a2").await.unwrap();
    assert_eq!(d1.version, 1);
    assert_eq!(d2.version, 2);

    // A failed build keeps its version; the next allocation moves on.
    store.mark_failed(d2.id, "compile error".to_string()).await.unwrap();
    let d3 = store.create_building(function.id, "archives/a3").await.unwrap();
    assert_eq!(d3.version, 3);

    assert_eq!(d1.image_tag, format!("func-{}:v1", function.uuid));
}

#[tokio::test]
async fn concurrent_deployments_never_share_a_version() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = std::sync::Arc::new(DeploymentStore::new(db.clone()));

    let mut handles = Vec::new();
    for n in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_building(function.id, &format!("archives/c{n}"))
                .await
                .unwrap()
                .version
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap());
    }
    versions.sort();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn activation_flip_keeps_at_most_one_active() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let deployments = DeploymentStore::new(db.clone());
    let functions = FunctionStore::new(db.clone());

    let d1 = deployments.create_building(function.id, "a1").await.unwrap();
    deployments.mark_ready(d1.id, None).await.unwrap();
    let previous = deployments.activate(function.id, d1.id).await.unwrap();
    assert!(previous.is_none());

    let d2 = deployments.create_building(function.id, "a2").await.unwrap();
    deployments.mark_ready(d2.id, None).await.unwrap();
    let previous = deployments.activate(function.id, d2.id).await.unwrap();
    assert_eq!(previous.unwrap().id, d1.id);

    let all = deployments.list_for_function(function.id).await.unwrap();
    let active: Vec<_> = all.iter().filter(|d| d.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, d2.id);

    let function = functions.find_by_id(function.id).await.unwrap().unwrap();
    assert_eq!(function.active_deployment_id, Some(d2.id));
}

#[tokio::test]
async fn rollback_reactivates_an_older_ready_deployment() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let deployments = DeploymentStore::new(db.clone());

    let mut ids = Vec::new();
    for n in 1..=3 {
        let d = deployments
            .create_building(function.id, &format!("a{n}"))
            .await
            .unwrap();
        deployments.mark_ready(d.id, None).await.unwrap();
        deployments.activate(function.id, d.id).await.unwrap();
        ids.push(d.id);
    }

    // Roll back to v1: it becomes the only active row again.
    deployments.activate(function.id, ids[0]).await.unwrap();
    let all = deployments.list_for_function(function.id).await.unwrap();
    for d in &all {
        assert_eq!(d.is_active, d.id == ids[0], "v{} active flag", d.version);
    }

    let functions = FunctionStore::new(db.clone());
    let function = functions.find_by_id(function.id).await.unwrap().unwrap();
    assert_eq!(function.active_deployment_id, Some(ids[0]));
}

#[tokio::test]
async fn building_deployment_cannot_be_activated() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let deployments = DeploymentStore::new(db.clone());

    let d = deployments.create_building(function.id, "a1").await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Building);

    let err = deployments.activate(function.id, d.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn function_names_are_unique_per_owner() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let other = seed_user(&db).await;
    let store = FunctionStore::new(db.clone());

    store.create(user.id, "echo", false, 5000).await.unwrap();
    let err = store.create(user.id, "echo", false, 5000).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // A different owner can reuse the name.
    store.create(other.id, "echo", false, 5000).await.unwrap();
}

#[tokio::test]
async fn soft_delete_hides_function_and_clears_pointer() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let store = FunctionStore::new(db.clone());

    let function = store.create(user.id, "echo", false, 5000).await.unwrap();
    let deleted = store.soft_delete(function.uuid).await.unwrap();
    assert_eq!(deleted.status, FunctionStatus::Deleted);
    assert!(deleted.active_deployment_id.is_none());

    assert!(store.list_for_owner(user.id).await.unwrap().is_empty());
    // The name becomes reusable after deletion.
    store.create(user.id, "echo", false, 5000).await.unwrap();
}

#[tokio::test]
async fn api_key_lifecycle_revoke_and_enable() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = ApiKeyStore::new(db.clone());

    let key = store
        .create(function.id, "ci", ApiKeyValidity::OneDay, "hash")
        .await
        .unwrap();
    assert!(key.is_active);
    assert!(key.expires_at.is_some());

    let revoked = store.revoke(key.uuid).await.unwrap();
    assert!(!revoked.is_active);
    assert!(revoked.revoked_at.is_some());

    let enabled = store.enable(key.uuid).await.unwrap();
    assert!(enabled.is_active);
    assert!(enabled.revoked_at.is_none());
    // Expiry was fixed at creation and did not move.
    assert_eq!(enabled.expires_at, key.expires_at);
}

#[tokio::test]
async fn forever_keys_have_no_expiry() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = ApiKeyStore::new(db.clone());

    let key = store
        .create(function.id, "ops", ApiKeyValidity::Forever, "hash")
        .await
        .unwrap();
    assert!(key.expires_at.is_none());
}

#[tokio::test]
async fn key_listing_orders_active_disabled_expired() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = ApiKeyStore::new(db.clone());

    let active = store
        .create(function.id, "active", ApiKeyValidity::Forever, "h1")
        .await
        .unwrap();
    let disabled = store
        .create(function.id, "disabled", ApiKeyValidity::Forever, "h2")
        .await
        .unwrap();
    store.revoke(disabled.uuid).await.unwrap();
    let expired = store
        .create(function.id, "expired", ApiKeyValidity::OneHour, "h3")
        .await
        .unwrap();
    // Backdate the expiry so the key reads as expired.
    {
        use sea_orm::{ActiveModelTrait, Set};
        let mut model: nimbus_entities::api_keys::ActiveModel =
            store.find_by_uuid(expired.uuid).await.unwrap().unwrap().into();
        model.expires_at = Set(Some(chrono::Utc::now() - chrono::Duration::hours(2)));
        model.update(db.as_ref()).await.unwrap();
    }

    let listed = store.list_for_function(function.id).await.unwrap();
    let names: Vec<_> = listed.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(names, vec!["active", "disabled", "expired"]);
    assert_eq!(listed[0].uuid, active.uuid);
}

#[tokio::test]
async fn invocation_rows_never_store_request_bodies() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = InvocationStore::new(db.clone());

    let row = store
        .record(InvocationRecord {
            uuid: Uuid::new_v4(),
            function_id: function.id,
            status: InvocationStatus::Ok,
            duration_ms: 42,
            error: None,
            logs: InvocationLogs::default(),
            request_info: RequestInfo {
                method: "POST".to_string(),
                path: "/".to_string(),
                headers: Default::default(),
                query: Default::default(),
            },
            result: Some(serde_json::json!({"echo": "hi"})),
        })
        .await
        .unwrap();

    assert!(row.success);
    let serialized = serde_json::to_value(&row.request_info).unwrap();
    assert!(serialized.get("body").is_none());

    let listed = store.list_for_function(function.id, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn timeout_invocations_are_not_successful() {
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;
    let store = InvocationStore::new(db.clone());

    let row = store
        .record(InvocationRecord {
            uuid: Uuid::new_v4(),
            function_id: function.id,
            status: InvocationStatus::Timeout,
            duration_ms: 1000,
            error: Some("function timed out".to_string()),
            logs: InvocationLogs::default(),
            request_info: RequestInfo::default(),
            result: None,
        })
        .await
        .unwrap();

    assert!(!row.success);
    assert_eq!(row.status, InvocationStatus::Timeout);
}
