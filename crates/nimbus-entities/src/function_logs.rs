use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use nimbus_core::DbDateTime;

/// Append-only log stream per function.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "function_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub function_id: i32,
    pub level: String,
    pub message: String,
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
