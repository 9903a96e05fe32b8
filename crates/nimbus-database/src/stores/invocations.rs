use std::sync::Arc;

use chrono::Utc;
use nimbus_entities::invocations::{self, Entity as Invocations, InvocationLogs, RequestInfo};
use nimbus_entities::types::InvocationStatus;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use uuid::Uuid;

use crate::connection::DbConnection;
use crate::stores::StoreError;

/// What the invocation engine records after each run. The request body is
/// deliberately absent from this type.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub uuid: Uuid,
    pub function_id: i32,
    pub status: InvocationStatus,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub logs: InvocationLogs,
    pub request_info: RequestInfo,
    pub result: Option<serde_json::Value>,
}

pub struct InvocationStore {
    db: Arc<DbConnection>,
}

impl InvocationStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Append-only insert; invocation rows are never updated.
    pub async fn record(
        &self,
        record: InvocationRecord,
    ) -> Result<invocations::Model, StoreError> {
        let model = invocations::ActiveModel {
            uuid: Set(record.uuid),
            function_id: Set(record.function_id),
            status: Set(record.status),
            success: Set(record.status == InvocationStatus::Ok),
            duration_ms: Set(record.duration_ms),
            error: Set(record.error),
            logs: Set(record.logs),
            request_info: Set(record.request_info),
            result: Set(record.result),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    pub async fn list_for_function(
        &self,
        function_id: i32,
        limit: u64,
    ) -> Result<Vec<invocations::Model>, StoreError> {
        Ok(Invocations::find()
            .filter(invocations::Column::FunctionId.eq(function_id))
            .order_by_desc(invocations::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }

    /// Aggregate counts per outcome plus the mean duration over the most
    /// recent `sample` rows.
    pub async fn stats_for_function(
        &self,
        function_id: i32,
        sample: u64,
    ) -> Result<InvocationStats, StoreError> {
        use sea_orm::PaginatorTrait;

        let base = || {
            Invocations::find().filter(invocations::Column::FunctionId.eq(function_id))
        };

        let total = base().count(self.db.as_ref()).await?;
        let succeeded = base()
            .filter(invocations::Column::Status.eq(InvocationStatus::Ok))
            .count(self.db.as_ref())
            .await?;
        let timed_out = base()
            .filter(invocations::Column::Status.eq(InvocationStatus::Timeout))
            .count(self.db.as_ref())
            .await?;
        let failed = total - succeeded - timed_out;

        let recent = self.list_for_function(function_id, sample).await?;
        let avg_duration_ms = if recent.is_empty() {
            None
        } else {
            Some(recent.iter().map(|r| r.duration_ms).sum::<i64>() / recent.len() as i64)
        };

        Ok(InvocationStats {
            total,
            succeeded,
            failed,
            timed_out,
            avg_duration_ms,
        })
    }
}

/// Aggregated view over a function's invocation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Mean over the sampled recent rows; absent with no history.
    pub avg_duration_ms: Option<i64>,
}
