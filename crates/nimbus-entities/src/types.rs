use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use utoipa::ToSchema;

/// Lifecycle state of a function.
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum FunctionStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "disabled")]
    Disabled,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

impl Display for FunctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionStatus::Active => write!(f, "active"),
            FunctionStatus::Disabled => write!(f, "disabled"),
            FunctionStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Build state of a deployment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[sea_orm(string_value = "building")]
    Building,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Building => write!(f, "building"),
            DeploymentStatus::Ready => write!(f, "ready"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Validity window requested at api-key creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ApiKeyValidity {
    #[sea_orm(string_value = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[sea_orm(string_value = "1d")]
    #[serde(rename = "1d")]
    OneDay,
    #[sea_orm(string_value = "1w")]
    #[serde(rename = "1w")]
    OneWeek,
    #[sea_orm(string_value = "1m")]
    #[serde(rename = "1m")]
    OneMonth,
    #[sea_orm(string_value = "forever")]
    #[serde(rename = "forever")]
    Forever,
}

impl ApiKeyValidity {
    /// The expiry derived from a creation instant; `None` means the key
    /// never expires. Fixed at creation and never recomputed.
    pub fn expires_at(
        &self,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            ApiKeyValidity::OneHour => Some(created_at + chrono::Duration::hours(1)),
            ApiKeyValidity::OneDay => Some(created_at + chrono::Duration::days(1)),
            ApiKeyValidity::OneWeek => Some(created_at + chrono::Duration::weeks(1)),
            ApiKeyValidity::OneMonth => Some(created_at + chrono::Duration::days(30)),
            ApiKeyValidity::Forever => None,
        }
    }
}

impl Display for ApiKeyValidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiKeyValidity::OneHour => write!(f, "1h"),
            ApiKeyValidity::OneDay => write!(f, "1d"),
            ApiKeyValidity::OneWeek => write!(f, "1w"),
            ApiKeyValidity::OneMonth => write!(f, "1m"),
            ApiKeyValidity::Forever => write!(f, "forever"),
        }
    }
}

/// Outcome of a single invocation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    #[sea_orm(string_value = "ok")]
    Ok,
    #[sea_orm(string_value = "fail")]
    Fail,
    #[sea_orm(string_value = "timeout")]
    Timeout,
}

impl Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationStatus::Ok => write!(f, "ok"),
            InvocationStatus::Fail => write!(f, "fail"),
            InvocationStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn validity_derives_expiry_from_creation() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            ApiKeyValidity::OneHour.expires_at(created).unwrap(),
            created + chrono::Duration::hours(1)
        );
        assert_eq!(
            ApiKeyValidity::OneMonth.expires_at(created).unwrap(),
            created + chrono::Duration::days(30)
        );
        assert!(ApiKeyValidity::Forever.expires_at(created).is_none());
    }

    #[test]
    fn validity_serializes_to_wire_labels() {
        assert_eq!(
            serde_json::to_string(&ApiKeyValidity::OneWeek).unwrap(),
            "\"1w\""
        );
        assert_eq!(
            serde_json::from_str::<ApiKeyValidity>("\"forever\"").unwrap(),
            ApiKeyValidity::Forever
        );
    }
}
