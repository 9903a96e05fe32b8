//! Test utilities for database integration tests
//!
//! Store tests run against an in-memory sqlite database with the full
//! migration set applied, so every test gets an isolated schema without
//! external services.

use std::sync::Arc;

use nimbus_entities::functions;
use nimbus_entities::users;
use nimbus_migrations::Migrator;
use sea_orm::{ActiveModelTrait, Database, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::DbConnection;

/// A fresh, fully migrated in-memory database.
///
/// The pool is pinned to a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise get its own empty database.
pub async fn test_db() -> Arc<DbConnection> {
    let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options)
        .await
        .expect("connect to in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    Arc::new(db)
}

/// Insert a user row for ownership in tests.
pub async fn seed_user(db: &DbConnection) -> users::Model {
    users::ActiveModel {
        uuid: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.com", Uuid::new_v4().simple())),
        name: Set("Test User".to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user")
}

/// Insert an active function owned by `owner_id`.
pub async fn seed_function(db: &DbConnection, owner_id: i32, name: &str) -> functions::Model {
    functions::ActiveModel {
        uuid: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        name: Set(name.to_string()),
        status: Set(nimbus_entities::types::FunctionStatus::Active),
        active_deployment_id: Set(None),
        skip_signing: Set(false),
        timeout_ms: Set(5000),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert function")
}
