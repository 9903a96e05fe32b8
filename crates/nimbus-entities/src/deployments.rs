use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use nimbus_core::DbDateTime;

use super::types::DeploymentStatus;

/// One build of a function at a specific version.
///
/// Versions are allocated as `max(version) + 1` under a row lock on the
/// function and are never reused; failed builds keep their number as part
/// of the audit trail.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "deployments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uuid: Uuid,
    pub function_id: i32,
    pub version: i32,
    pub image_tag: String,
    /// Object-storage key the uploaded archive was persisted under.
    pub archive_key: String,
    pub status: DeploymentStatus,
    pub is_active: bool,
    pub build_logs: Option<String>,
    pub deployed_at: DbDateTime,
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
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert && self.deployed_at.is_not_set() {
            self.deployed_at = Set(chrono::Utc::now());
        }
        Ok(self)
    }
}
