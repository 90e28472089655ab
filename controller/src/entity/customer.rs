use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::ServiceType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customer")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub username: String,
    /// pppoe / hotspot / both
    #[serde(rename = "serviceType")]
    pub service_type: String,
    /// active / suspended / expired / pending
    pub status: String,
    #[serde(rename = "pppoeUsername")]
    pub pppoe_username: Option<String>,
    #[serde(skip_serializing)]
    pub pppoe_password: Option<String>,
    #[serde(rename = "hotspotUsername")]
    pub hotspot_username: Option<String>,
    #[serde(skip_serializing)]
    pub hotspot_password: Option<String>,
    #[serde(rename = "hotspotMacAddress")]
    pub hotspot_mac_address: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscription,
    #[sea_orm(has_many = "super::shadow_account::Entity")]
    ShadowAccount,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl Related<super::shadow_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShadowAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Model {
    pub fn service_type(&self) -> ServiceType {
        ServiceType::parse(&self.service_type)
    }

    /// 指定服务的设备账号（未单独设置时使用登录名）
    pub fn service_username(&self, service: ServiceType) -> &str {
        let explicit = match service {
            ServiceType::Hotspot => non_empty(&self.hotspot_username),
            _ => non_empty(&self.pppoe_username),
        };
        explicit.unwrap_or(&self.username)
    }

    /// 指定服务的设备密码（未单独设置时使用登录名）
    pub fn service_password(&self, service: ServiceType) -> &str {
        let explicit = match service {
            ServiceType::Hotspot => non_empty(&self.hotspot_password),
            _ => non_empty(&self.pppoe_password),
        };
        explicit.unwrap_or(&self.username)
    }
}
