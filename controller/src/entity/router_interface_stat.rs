use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 路由器接口实时吞吐（从客户视角：rx = 上行，tx = 下行）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "router_interface_stat")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "routerId")]
    pub router_id: i64,
    #[serde(rename = "interfaceName")]
    pub interface_name: String,
    #[serde(rename = "rxBps")]
    pub rx_bps: i64,
    #[serde(rename = "txBps")]
    pub tx_bps: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::router::Entity",
        from = "Column::RouterId",
        to = "super::router::Column::Id"
    )]
    Router,
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
