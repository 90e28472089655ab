use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "router")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(rename = "useSsl")]
    pub use_ssl: bool,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "lastSync")]
    pub last_sync: Option<DateTime>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::plan_router::Entity")]
    PlanRouter,
    #[sea_orm(has_many = "super::shadow_account::Entity")]
    ShadowAccount,
    #[sea_orm(has_many = "super::active_session::Entity")]
    ActiveSession,
}

impl Related<super::plan_router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PlanRouter.def()
    }
}

impl Related<super::shadow_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShadowAccount.def()
    }
}

impl Related<super::active_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ActiveSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 设备连接参数
    pub fn target(&self) -> common::RouterTarget {
        common::RouterTarget {
            name: self.name.clone(),
            host: self.host.clone(),
            port: u16::try_from(self.port).unwrap_or(common::api::DEFAULT_API_PORT),
            username: self.username.clone(),
            password: self.password.clone(),
            secure: self.use_ssl,
        }
    }
}
