//! Deployment orchestrator tests against a scripted runtime: versioning,
//! activation, build failure bookkeeping, and archive rejection.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{make_archive, test_config, valid_package, RunScript, ScriptedRuntime};
use nimbus_core::PlatformError;
use nimbus_database::test_utils::{seed_function, seed_user, test_db};
use nimbus_database::{DeploymentStore, FunctionLogStore, FunctionStore};
use nimbus_entities::types::DeploymentStatus;
use nimbus_functions::DeploymentService;

struct Fixture {
    service: DeploymentService,
    runtime: Arc<ScriptedRuntime>,
    deployments: Arc<DeploymentStore>,
    function: nimbus_entities::functions::Model,
    _root: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let db = test_db().await;
    let user = seed_user(&db).await;
    let function = seed_function(&db, user.id, "echo").await;

    let functions = Arc::new(FunctionStore::new(db.clone()));
    let deployments = Arc::new(DeploymentStore::new(db.clone()));
    let logs = Arc::new(FunctionLogStore::new(db.clone()));
    let runtime = Arc::new(ScriptedRuntime::new(
        root.path().to_path_buf(),
        RunScript::NoResult,
    ));
    let config = test_config(root.path(), 10);

    Fixture {
        service: DeploymentService::new(
            functions,
            deployments.clone(),
            logs,
            runtime.clone(),
            config,
        ),
        runtime,
        deployments,
        function,
        _root: root,
    }
}

#[tokio::test]
async fn deploy_builds_and_activates_version_one() {
    let f = fixture().await;

    let outcome = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    assert_eq!(outcome.version, 1);
    assert_eq!(
        outcome.image_tag,
        format!("func-{}:v1", f.function.uuid)
    );
    assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 1);

    let active = f
        .deployments
        .find_active(f.function.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.uuid, outcome.deployment_uuid);
    assert_eq!(active.status, DeploymentStatus::Ready);
}

#[tokio::test]
async fn redeploy_bumps_version_and_retires_previous_image() {
    let f = fixture().await;

    let first = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    let second = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    assert_eq!(second.version, 2);

    let active = f
        .deployments
        .find_active(f.function.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.uuid, second.deployment_uuid);

    // Old image removal is scheduled out of band.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let removed = f.runtime.removed_images.lock().await.clone();
    assert_eq!(removed, vec![first.image_tag]);
}

#[tokio::test]
async fn failed_build_keeps_row_and_surfaces_logs() {
    let f = fixture().await;
    f.runtime.build_exit_code.store(1, Ordering::SeqCst);

    let err = f
        .service
        .deploy(&f.function, &valid_package())
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::BuildFailed(_)));

    // The failed deployment consumed version 1 and recorded the logs.
    let rows = f.deployments.list_for_function(f.function.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DeploymentStatus::Failed);
    assert!(rows[0].build_logs.as_deref().unwrap().contains("compile error"));
    assert!(!rows[0].is_active);

    // The next successful deploy moves on to version 2.
    f.runtime.build_exit_code.store(0, Ordering::SeqCst);
    let outcome = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    assert_eq!(outcome.version, 2);
}

#[tokio::test]
async fn archive_with_two_annotated_classes_is_rejected_before_any_row() {
    let f = fixture().await;

    let handler = r#"
import 'package:dart_cloud/dart_cloud.dart';

@cloudFunction
class First extends CloudFunction {}
"#;
    let archive = make_archive(&[
        (
            "pubspec.yaml",
            "name: twins\ndependencies:\n  dart_cloud: ^1.0.0\n",
        ),
        ("lib/first.dart", handler),
        (
            "lib/second.dart",
            handler.replace("First", "Second").as_str(),
        ),
    ]);

    let err = f.service.deploy(&f.function, &archive).await.unwrap_err();
    assert!(matches!(err, PlatformError::InvalidArchive(_)));

    // No deployment row, no build.
    assert!(f
        .deployments
        .list_for_function(f.function.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_deployments_of_one_function_conflict() {
    let f = std::sync::Arc::new(fixture().await);
    f.runtime.build_delay_ms.store(300, Ordering::SeqCst);

    let first = {
        let f = f.clone();
        tokio::spawn(async move { f.service.deploy(&f.function, &valid_package()).await })
    };
    // Let the first deploy claim the single-flight slot.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let err = f
        .service
        .deploy(&f.function, &valid_package())
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::StoreConflict(_)));

    // The first deployment still completes normally.
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.version, 1);
}

#[tokio::test]
async fn corrupted_archive_is_rejected() {
    let f = fixture().await;
    let err = f
        .service
        .deploy(&f.function, b"not a tar.gz at all")
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::InvalidArchive(_)));
}

#[tokio::test]
async fn rollback_to_unknown_deployment_is_not_found() {
    let f = fixture().await;
    f.service.deploy(&f.function, &valid_package()).await.unwrap();

    let err = f
        .service
        .rollback(&f.function, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::NotFound(_)));
}

#[tokio::test]
async fn rollback_flips_active_pointer() {
    let f = fixture().await;
    let v1 = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    let _v2 = f.service.deploy(&f.function, &valid_package()).await.unwrap();
    let _v3 = f.service.deploy(&f.function, &valid_package()).await.unwrap();

    let rolled = f
        .service
        .rollback(&f.function, v1.deployment_uuid)
        .await
        .unwrap();
    assert_eq!(rolled.version, 1);
    assert!(rolled.is_active);

    let rows = f.deployments.list_for_function(f.function.id).await.unwrap();
    for row in rows {
        assert_eq!(row.is_active, row.version == 1, "v{} flag", row.version);
    }
}

#[tokio::test]
async fn delete_schedules_removal_of_every_image() {
    let f = fixture().await;
    f.service.deploy(&f.function, &valid_package()).await.unwrap();
    f.service.deploy(&f.function, &valid_package()).await.unwrap();

    f.service.delete_function(&f.function).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let removed = f.runtime.removed_images.lock().await.clone();
    // v1 was retired by the redeploy, then delete sweeps both tags.
    assert!(removed.contains(&format!("func-{}:v1", f.function.uuid)));
    assert!(removed.contains(&format!("func-{}:v2", f.function.uuid)));
}
