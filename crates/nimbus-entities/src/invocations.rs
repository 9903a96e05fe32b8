use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use nimbus_core::{FunctionLogEntry, DbDateTime};
use utoipa::ToSchema;

use super::types::InvocationStatus;

/// Request metadata persisted with an invocation.
///
/// Method, path, headers and query only. The request body is never stored
/// here, by contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(rename_all = "camelCase")]
#[derive(Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub query: std::collections::BTreeMap<String, String>,
}

/// Log lines harvested from the container's `logs.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[derive(Default)]
pub struct InvocationLogs {
    #[serde(default)]
    pub logs: Vec<FunctionLogEntry>,
}

/// One execution of the active deployment. Append-only; rows are never
/// mutated after insert.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invocations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uuid: Uuid,
    pub function_id: i32,
    pub status: InvocationStatus,
    pub success: bool,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub logs: InvocationLogs,
    pub request_info: RequestInfo,
    /// The body the function produced, verbatim.
    pub result: Option<Json>,
    pub created_at: DbDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::functions::Entity",
        from = "Column::FunctionId",
        to = "super::functions::Column::Id"
    )]
    Function,
}

impl Related<super::functions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Function.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
