use std::sync::Arc;

use nimbus_entities::deployments::{self, Entity as Deployments};
use nimbus_entities::functions::{self, Entity as Functions};
use nimbus_entities::types::DeploymentStatus;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseBackend, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::connection::DbConnection;
use crate::stores::StoreError;

pub struct DeploymentStore {
    db: Arc<DbConnection>,
}

impl DeploymentStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Allocate the next version for a function and insert the building
    /// row, atomically. The function row is locked for the duration so
    /// concurrent deployments serialize on the version counter; versions
    /// are never reused, failed builds included.
    pub async fn create_building(
        &self,
        function_id: i32,
        archive_key: &str,
    ) -> Result<deployments::Model, StoreError> {
        let archive_key = archive_key.to_string();
        let model = self
            .db
            .transaction::<_, deployments::Model, StoreError>(move |txn| {
                Box::pin(async move {
                    let function = find_locked(txn, function_id).await?.ok_or_else(|| {
                        StoreError::NotFound(format!("function id {function_id}"))
                    })?;

                    let last = Deployments::find()
                        .filter(deployments::Column::FunctionId.eq(function_id))
                        .order_by_desc(deployments::Column::Version)
                        .one(txn)
                        .await?;
                    let version = last.map(|d| d.version + 1).unwrap_or(1);

                    let image_tag = format!("func-{}:v{}", function.uuid, version);

                    let model = deployments::ActiveModel {
                        uuid: Set(Uuid::new_v4()),
                        function_id: Set(function_id),
                        version: Set(version),
                        image_tag: Set(image_tag),
                        archive_key: Set(archive_key),
                        status: Set(DeploymentStatus::Building),
                        is_active: Set(false),
                        build_logs: Set(None),
                        ..Default::default()
                    };

                    Ok(model.insert(txn).await?)
                })
            })
            .await?;

        Ok(model)
    }

    pub async fn mark_ready(
        &self,
        id: i32,
        build_logs: Option<String>,
    ) -> Result<deployments::Model, StoreError> {
        self.set_status(id, DeploymentStatus::Ready, build_logs).await
    }

    pub async fn mark_failed(
        &self,
        id: i32,
        build_logs: String,
    ) -> Result<deployments::Model, StoreError> {
        self.set_status(id, DeploymentStatus::Failed, Some(build_logs))
            .await
    }

    async fn set_status(
        &self,
        id: i32,
        status: DeploymentStatus,
        build_logs: Option<String>,
    ) -> Result<deployments::Model, StoreError> {
        let deployment = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("deployment id {id}")))?;

        let mut active: deployments::ActiveModel = deployment.into();
        active.status = Set(status);
        if let Some(logs) = build_logs {
            active.build_logs = Set(Some(logs));
        }
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Atomically make `deployment_id` the single active deployment of its
    /// function: deactivate the previous one, activate the new one, and
    /// repoint `functions.active_deployment_id`. Returns the deployment
    /// that was active before the flip, if any.
    pub async fn activate(
        &self,
        function_id: i32,
        deployment_id: i32,
    ) -> Result<Option<deployments::Model>, StoreError> {
        let previous = self
            .db
            .transaction::<_, Option<deployments::Model>, StoreError>(move |txn| {
                Box::pin(async move {
                    find_locked(txn, function_id).await?.ok_or_else(|| {
                        StoreError::NotFound(format!("function id {function_id}"))
                    })?;

                    let target = Deployments::find_by_id(deployment_id)
                        .filter(deployments::Column::FunctionId.eq(function_id))
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            StoreError::NotFound(format!("deployment id {deployment_id}"))
                        })?;

                    if target.status != DeploymentStatus::Ready {
                        return Err(StoreError::Conflict(format!(
                            "deployment v{} is {} and cannot be activated",
                            target.version, target.status
                        )));
                    }

                    let previous = Deployments::find()
                        .filter(deployments::Column::FunctionId.eq(function_id))
                        .filter(deployments::Column::IsActive.eq(true))
                        .one(txn)
                        .await?;

                    if let Some(ref prev) = previous {
                        if prev.id != deployment_id {
                            let mut prev_active: deployments::ActiveModel = prev.clone().into();
                            prev_active.is_active = Set(false);
                            prev_active.update(txn).await?;
                        }
                    }

                    let mut target_active: deployments::ActiveModel = target.into();
                    target_active.is_active = Set(true);
                    target_active.update(txn).await?;

                    let mut function_active = functions::ActiveModel {
                        id: Set(function_id),
                        ..Default::default()
                    };
                    function_active.active_deployment_id = Set(Some(deployment_id));
                    function_active.update(txn).await?;

                    Ok(previous.filter(|p| p.id != deployment_id))
                })
            })
            .await?;

        Ok(previous)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<deployments::Model>, StoreError> {
        Ok(Deployments::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn find_by_uuid(
        &self,
        uuid: Uuid,
    ) -> Result<Option<deployments::Model>, StoreError> {
        Ok(Deployments::find()
            .filter(deployments::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_active(
        &self,
        function_id: i32,
    ) -> Result<Option<deployments::Model>, StoreError> {
        Ok(Deployments::find()
            .filter(deployments::Column::FunctionId.eq(function_id))
            .filter(deployments::Column::IsActive.eq(true))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list_for_function(
        &self,
        function_id: i32,
    ) -> Result<Vec<deployments::Model>, StoreError> {
        Ok(Deployments::find()
            .filter(deployments::Column::FunctionId.eq(function_id))
            .order_by_desc(deployments::Column::Version)
            .all(self.db.as_ref())
            .await?)
    }
}

/// Lock the function row for the transaction. Postgres takes a real
/// `FOR UPDATE` row lock; sqlite serializes on its single writer.
async fn find_locked(
    txn: &DatabaseTransaction,
    function_id: i32,
) -> Result<Option<functions::Model>, StoreError> {
    use sea_orm::ConnectionTrait;

    let query = Functions::find_by_id(function_id);
    let query = if txn.get_database_backend() == DatabaseBackend::Postgres {
        query.lock_exclusive()
    } else {
        query
    };
    Ok(query.one(txn).await?)
}
