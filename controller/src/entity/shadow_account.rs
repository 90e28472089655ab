use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_ENABLED: &str = "enabled";
pub const STATUS_DISABLED: &str = "disabled";

/// 设备账号影子记录（PPPoE secret / Hotspot 用户）
///
/// 每个 (客户, 服务类型, 路由器) 一条，仅由对账引擎写入，禁用时原地保留。
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shadow_account")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "customerId")]
    pub customer_id: i64,
    #[serde(rename = "routerId")]
    pub router_id: i64,
    /// pppoe / hotspot
    #[serde(rename = "serviceType")]
    pub service_type: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub profile: String,
    #[serde(rename = "macAddress")]
    pub mac_address: Option<String>,
    /// enabled / disabled
    pub status: String,
    #[serde(rename = "syncedToRouter")]
    pub synced_to_router: bool,
    #[serde(rename = "lastSync")]
    pub last_sync: Option<DateTime>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::router::Entity",
        from = "Column::RouterId",
        to = "super::router::Column::Id"
    )]
    Router,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}
