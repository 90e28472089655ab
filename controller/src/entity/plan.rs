use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::ServiceType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plan")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "uploadMbps")]
    pub upload_mbps: i32,
    #[serde(rename = "downloadMbps")]
    pub download_mbps: i32,
    /// 设备侧限速配置名
    #[serde(rename = "profileName")]
    pub profile_name: String,
    #[serde(rename = "durationValue")]
    pub duration_value: i32,
    /// minutes / hours / days / weeks / months
    #[serde(rename = "durationUnit")]
    pub duration_unit: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::plan_router::Entity")]
    PlanRouter,
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscription,
}

impl Related<super::plan_router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PlanRouter.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn service_type(&self) -> ServiceType {
        ServiceType::parse(&self.service_type)
    }

    /// 限速字符串 `"<上行>M/<下行>M"`
    pub fn rate_limit(&self) -> String {
        common::utils::format_rate_limit(self.upload_mbps.max(0) as u32, self.download_mbps.max(0) as u32)
    }

    /// 套餐时长
    pub fn duration(&self) -> chrono::Duration {
        let value = self.duration_value.max(0) as i64;
        match self.duration_unit.as_str() {
            "minutes" => chrono::Duration::minutes(value),
            "hours" => chrono::Duration::hours(value),
            "weeks" => chrono::Duration::weeks(value),
            "months" => chrono::Duration::days(value * 30),
            _ => chrono::Duration::days(value),
        }
    }
}
