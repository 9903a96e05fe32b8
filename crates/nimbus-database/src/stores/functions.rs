use std::sync::Arc;

use nimbus_entities::functions::{self, Entity as Functions};
use nimbus_entities::types::FunctionStatus;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::connection::DbConnection;
use crate::stores::StoreError;

pub struct FunctionStore {
    db: Arc<DbConnection>,
}

impl FunctionStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        owner_id: i32,
        name: &str,
        skip_signing: bool,
        timeout_ms: i64,
    ) -> Result<functions::Model, StoreError> {
        let existing = Functions::find()
            .filter(functions::Column::OwnerId.eq(owner_id))
            .filter(functions::Column::Name.eq(name))
            .filter(functions::Column::Status.ne(FunctionStatus::Deleted))
            .one(self.db.as_ref())
            .await?;

        if existing.is_some() {
            return Err(StoreError::Conflict(format!(
                "function '{name}' already exists for this owner"
            )));
        }

        let model = functions::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            name: Set(name.to_string()),
            status: Set(FunctionStatus::Active),
            active_deployment_id: Set(None),
            skip_signing: Set(skip_signing),
            timeout_ms: Set(timeout_ms),
            ..Default::default()
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<functions::Model>, StoreError> {
        Ok(Functions::find()
            .filter(functions::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<functions::Model>, StoreError> {
        Ok(Functions::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn find_by_owner_and_name(
        &self,
        owner_id: i32,
        name: &str,
    ) -> Result<Option<functions::Model>, StoreError> {
        Ok(Functions::find()
            .filter(functions::Column::OwnerId.eq(owner_id))
            .filter(functions::Column::Name.eq(name))
            .filter(functions::Column::Status.ne(FunctionStatus::Deleted))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list_for_owner(
        &self,
        owner_id: i32,
    ) -> Result<Vec<functions::Model>, StoreError> {
        Ok(Functions::find()
            .filter(functions::Column::OwnerId.eq(owner_id))
            .filter(functions::Column::Status.ne(FunctionStatus::Deleted))
            .order_by_desc(functions::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn count_for_owner(&self, owner_id: i32) -> Result<u64, StoreError> {
        Ok(Functions::find()
            .filter(functions::Column::OwnerId.eq(owner_id))
            .filter(functions::Column::Status.ne(FunctionStatus::Deleted))
            .count(self.db.as_ref())
            .await?)
    }

    /// Soft delete: the row stays as audit trail, the status flips to
    /// deleted and the active pointer is cleared.
    pub async fn soft_delete(&self, uuid: Uuid) -> Result<functions::Model, StoreError> {
        let function = self
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("function {uuid}")))?;

        let mut active: functions::ActiveModel = function.into();
        active.status = Set(FunctionStatus::Deleted);
        active.active_deployment_id = Set(None);
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn set_status(
        &self,
        id: i32,
        status: FunctionStatus,
    ) -> Result<functions::Model, StoreError> {
        let function = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("function id {id}")))?;

        let mut active: functions::ActiveModel = function.into();
        active.status = Set(status);
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Partial settings update; absent fields keep their value.
    pub async fn update_settings(
        &self,
        id: i32,
        skip_signing: Option<bool>,
        timeout_ms: Option<i64>,
    ) -> Result<functions::Model, StoreError> {
        let function = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("function id {id}")))?;

        let mut active: functions::ActiveModel = function.into();
        if let Some(skip_signing) = skip_signing {
            active.skip_signing = Set(skip_signing);
        }
        if let Some(timeout_ms) = timeout_ms {
            active.timeout_ms = Set(timeout_ms);
        }
        Ok(active.update(self.db.as_ref()).await?)
    }
}
