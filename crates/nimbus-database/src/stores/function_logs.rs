use std::sync::Arc;

use chrono::Utc;
use nimbus_entities::function_logs::{self, Entity as FunctionLogs};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};

use crate::connection::DbConnection;
use crate::stores::StoreError;

pub struct FunctionLogStore {
    db: Arc<DbConnection>,
}

impl FunctionLogStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        function_id: i32,
        level: &str,
        message: &str,
    ) -> Result<function_logs::Model, StoreError> {
        let model = function_logs::ActiveModel {
            function_id: Set(function_id),
            level: Set(level.to_string()),
            message: Set(message.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    pub async fn list_for_function(
        &self,
        function_id: i32,
        limit: u64,
    ) -> Result<Vec<function_logs::Model>, StoreError> {
        Ok(FunctionLogs::find()
            .filter(function_logs::Column::FunctionId.eq(function_id))
            .order_by_desc(function_logs::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }
}
