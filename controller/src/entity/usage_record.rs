use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "usage_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "customerId")]
    pub customer_id: i64,
    #[serde(rename = "subscriptionId")]
    pub subscription_id: i64,
    #[serde(rename = "uploadBytes")]
    pub upload_bytes: i64,
    #[serde(rename = "downloadBytes")]
    pub download_bytes: i64,
    #[serde(rename = "sessionTimeSeconds")]
    pub session_time_seconds: i64,
    #[serde(rename = "uploadSpeedMbps")]
    pub upload_speed_mbps: f64,
    #[serde(rename = "downloadSpeedMbps")]
    pub download_speed_mbps: f64,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "framedIpAddress")]
    pub framed_ip_address: Option<String>,
    #[serde(rename = "startTime")]
    pub start_time: DateTime,
    #[serde(rename = "endTime")]
    pub end_time: Option<DateTime>,
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
        belongs_to = "super::subscription::Entity",
        from = "Column::SubscriptionId",
        to = "super::subscription::Column::Id"
    )]
    Subscription,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn total_bytes(&self) -> i64 {
        self.upload_bytes.saturating_add(self.download_bytes)
    }
}
