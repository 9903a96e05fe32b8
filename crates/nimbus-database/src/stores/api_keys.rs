use std::sync::Arc;

use chrono::Utc;
use nimbus_entities::api_keys::{self, Entity as ApiKeys};
use nimbus_entities::types::ApiKeyValidity;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::connection::DbConnection;
use crate::stores::StoreError;

pub struct ApiKeyStore {
    db: Arc<DbConnection>,
}

impl ApiKeyStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        function_id: i32,
        name: &str,
        validity: ApiKeyValidity,
        secret_hash: &str,
    ) -> Result<api_keys::Model, StoreError> {
        self.create_with_uuid(Uuid::new_v4(), function_id, name, validity, secret_hash)
            .await
    }

    /// Insert with a caller-chosen key id; the secret hash is salted with
    /// it, so the id must exist before hashing.
    pub async fn create_with_uuid(
        &self,
        uuid: Uuid,
        function_id: i32,
        name: &str,
        validity: ApiKeyValidity,
        secret_hash: &str,
    ) -> Result<api_keys::Model, StoreError> {
        let now = Utc::now();
        let model = api_keys::ActiveModel {
            uuid: Set(uuid),
            function_id: Set(function_id),
            name: Set(name.to_string()),
            secret_hash: Set(secret_hash.to_string()),
            validity: Set(validity),
            expires_at: Set(validity.expires_at(now)),
            is_active: Set(true),
            created_at: Set(now),
            revoked_at: Set(None),
            last_used_at: Set(None),
            ..Default::default()
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Stamp a successful verification. Best-effort bookkeeping; callers
    /// ignore failures.
    pub async fn touch_last_used(&self, uuid: Uuid) -> Result<(), StoreError> {
        let Some(key) = self.find_by_uuid(uuid).await? else {
            return Ok(());
        };
        let mut active: api_keys::ActiveModel = key.into();
        active.last_used_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<api_keys::Model>, StoreError> {
        Ok(ApiKeys::find()
            .filter(api_keys::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?)
    }

    /// Keys ordered for listing: active first, then disabled, then
    /// expired; ties broken by creation time, newest first. "Expired" is
    /// derived at read time.
    pub async fn list_for_function(
        &self,
        function_id: i32,
    ) -> Result<Vec<api_keys::Model>, StoreError> {
        let mut keys = ApiKeys::find()
            .filter(api_keys::Column::FunctionId.eq(function_id))
            .all(self.db.as_ref())
            .await?;

        let now = Utc::now();
        keys.sort_by(|a, b| {
            rank(a, now)
                .cmp(&rank(b, now))
                .then(b.created_at.cmp(&a.created_at))
        });

        Ok(keys)
    }

    pub async fn revoke(&self, uuid: Uuid) -> Result<api_keys::Model, StoreError> {
        let key = self
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("api key {uuid}")))?;

        let mut active: api_keys::ActiveModel = key.into();
        active.is_active = Set(false);
        active.revoked_at = Set(Some(Utc::now()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Re-enable a revoked key. Expired keys stay dead: the expiry was
    /// fixed at creation and enabling never extends it.
    pub async fn enable(&self, uuid: Uuid) -> Result<api_keys::Model, StoreError> {
        let key = self
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("api key {uuid}")))?;

        if let Some(expires_at) = key.expires_at {
            if expires_at <= Utc::now() {
                return Err(StoreError::Conflict(format!(
                    "api key {uuid} expired at {expires_at} and cannot be re-enabled"
                )));
            }
        }

        let mut active: api_keys::ActiveModel = key.into();
        active.is_active = Set(true);
        active.revoked_at = Set(None);
        Ok(active.update(self.db.as_ref()).await?)
    }
}

fn rank(key: &api_keys::Model, now: nimbus_core::UtcDateTime) -> u8 {
    let expired = key.expires_at.map(|e| e <= now).unwrap_or(false);
    if expired {
        2
    } else if !key.is_active {
        1
    } else {
        0
    }
}
