use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use nimbus_core::DbDateTime;

use super::types::ApiKeyValidity;

/// An invocation credential for one function.
///
/// Only the salted hash of the secret is stored; the cleartext is returned
/// exactly once at creation. `expires_at` is derived from `created_at`
/// plus the validity window at creation time and never changed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uuid: Uuid,
    pub function_id: i32,
    pub name: String,
    pub secret_hash: String,
    pub validity: ApiKeyValidity,
    pub expires_at: Option<DbDateTime>,
    pub is_active: bool,
    pub created_at: DbDateTime,
    pub revoked_at: Option<DbDateTime>,
    pub last_used_at: Option<DbDateTime>,
}

impl Model {
    /// A key verifies only while active and unexpired.
    pub fn is_valid_at(&self, now: DbDateTime) -> bool {
        self.is_active && self.expires_at.map(|e| e > now).unwrap_or(true)
    }
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
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(chrono::Utc::now());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key(is_active: bool, expires_at: Option<DbDateTime>) -> Model {
        Model {
            id: 1,
            uuid: Uuid::new_v4(),
            function_id: 1,
            name: "ci".to_string(),
            secret_hash: "abc".to_string(),
            validity: ApiKeyValidity::OneDay,
            expires_at,
            is_active,
            created_at: Utc::now(),
            revoked_at: None,
            last_used_at: None,
        }
    }

    #[test]
    fn validity_requires_active_and_unexpired() {
        let now = Utc::now();
        assert!(key(true, None).is_valid_at(now));
        assert!(key(true, Some(now + chrono::Duration::hours(1))).is_valid_at(now));
        assert!(!key(true, Some(now - chrono::Duration::hours(1))).is_valid_at(now));
        assert!(!key(false, None).is_valid_at(now));
    }
}
