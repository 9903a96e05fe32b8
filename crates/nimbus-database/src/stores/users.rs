use std::sync::Arc;

use nimbus_entities::users::{self, Entity as Users};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::connection::DbConnection;
use crate::stores::StoreError;

/// Owners are managed by the external auth service; this store only
/// resolves and mirrors them for ownership checks.
pub struct UserStore {
    db: Arc<DbConnection>,
}

impl UserStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<users::Model>, StoreError> {
        Ok(Users::find()
            .filter(users::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?)
    }

    /// Mirror an externally managed user on first sight.
    pub async fn find_or_create(
        &self,
        uuid: Uuid,
        email: &str,
        name: &str,
    ) -> Result<users::Model, StoreError> {
        if let Some(existing) = self.find_by_uuid(uuid).await? {
            return Ok(existing);
        }

        let model = users::ActiveModel {
            uuid: Set(uuid),
            email: Set(email.to_string()),
            name: Set(name.to_string()),
            ..Default::default()
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }
}
