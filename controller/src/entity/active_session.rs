use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 在线会话（每轮采集刷新，未再出现的会话被删除）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "active_session")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "routerId")]
    pub router_id: i64,
    #[serde(rename = "customerId")]
    pub customer_id: i64,
    /// pppoe / hotspot
    #[serde(rename = "sessionType")]
    pub session_type: String,
    /// `<服务类型>:<设备 .id>`
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub username: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: Option<String>,
    #[serde(rename = "macAddress")]
    pub mac_address: Option<String>,
    #[serde(rename = "uploadBytes")]
    pub upload_bytes: i64,
    #[serde(rename = "downloadBytes")]
    pub download_bytes: i64,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: i64,
    #[serde(rename = "startTime")]
    pub start_time: DateTime,
    #[serde(rename = "lastUpdate")]
    pub last_update: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::router::Entity",
        from = "Column::RouterId",
        to = "super::router::Column::Id"
    )]
    Router,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
