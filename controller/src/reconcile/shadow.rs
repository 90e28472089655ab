//! 影子记录：设备账号期望状态与最后一次同步结果
//!
//! 读-改-写均在数据库事务内完成，调用方另持有客户锁。

use anyhow::Result;
use chrono::NaiveDateTime;
use common::command::{HotspotUserParams, PppSecretParams};
use common::utils::normalize_mac;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::entity::shadow_account::{self, STATUS_DISABLED, STATUS_ENABLED};
use crate::entity::{customer, plan, ServiceType, ShadowAccount};

/// 某客户某服务的期望设备账号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAccount {
    pub service: ServiceType,
    pub username: String,
    pub password: String,
    pub profile: String,
    pub mac_address: Option<String>,
    pub enabled: bool,
}

impl DesiredAccount {
    pub fn for_customer(customer: &customer::Model, plan: &plan::Model, service: ServiceType) -> Self {
        let mac_address = match service {
            ServiceType::Hotspot => normalize_mac(customer.hotspot_mac_address.as_deref()),
            _ => None,
        };

        Self {
            service,
            username: customer.service_username(service).to_string(),
            password: customer.service_password(service).to_string(),
            profile: plan.profile_name.clone(),
            mac_address,
            enabled: true,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.enabled {
            STATUS_ENABLED
        } else {
            STATUS_DISABLED
        }
    }

    pub fn ppp_secret(&self) -> PppSecretParams {
        let mut secret = PppSecretParams::new(&self.username, &self.password, &self.profile);
        secret.disabled = !self.enabled;
        secret
    }

    pub fn hotspot_user(&self) -> HotspotUserParams {
        let mut user = HotspotUserParams::new(&self.username, &self.password, &self.profile);
        user.disabled = !self.enabled;
        user.mac_address = self.mac_address.clone();
        user
    }
}

/// 是否需要访问设备
///
/// 影子记录存在、已同步，且账号名/密码/配置/MAC/状态均一致时跳过。
pub fn needs_update(shadow: Option<&shadow_account::Model>, desired: &DesiredAccount) -> bool {
    let Some(shadow) = shadow else {
        return true;
    };

    !shadow.synced_to_router
        || shadow.username != desired.username
        || shadow.password != desired.password
        || shadow.profile != desired.profile
        || normalize_mac(shadow.mac_address.as_deref()) != desired.mac_address
        || shadow.status != desired.status()
}

pub async fn find<C: ConnectionTrait>(
    db: &C,
    customer_id: i64,
    service: ServiceType,
    router_id: i64,
) -> Result<Option<shadow_account::Model>> {
    Ok(ShadowAccount::find()
        .filter(shadow_account::Column::CustomerId.eq(customer_id))
        .filter(shadow_account::Column::ServiceType.eq(service.as_str()))
        .filter(shadow_account::Column::RouterId.eq(router_id))
        .one(db)
        .await?)
}

/// 客户的全部影子记录
pub async fn for_customer(db: &DatabaseConnection, customer_id: i64) -> Result<Vec<shadow_account::Model>> {
    Ok(ShadowAccount::find()
        .filter(shadow_account::Column::CustomerId.eq(customer_id))
        .order_by_asc(shadow_account::Column::ServiceType)
        .order_by_asc(shadow_account::Column::RouterId)
        .all(db)
        .await?)
}

/// 写入期望字段；`synced` 为 false 时保留旧的同步字段以便下次重试
async fn upsert(
    db: &DatabaseConnection,
    customer_id: i64,
    router_id: i64,
    desired: &DesiredAccount,
    synced: bool,
    now: NaiveDateTime,
) -> Result<shadow_account::Model> {
    let txn = db.begin().await?;

    let model = match find(&txn, customer_id, desired.service, router_id).await? {
        Some(existing) if synced => {
            let mut active: shadow_account::ActiveModel = existing.into();
            active.username = Set(desired.username.clone());
            active.password = Set(desired.password.clone());
            active.profile = Set(desired.profile.clone());
            active.mac_address = Set(desired.mac_address.clone());
            active.status = Set(desired.status().to_string());
            active.synced_to_router = Set(true);
            active.last_sync = Set(Some(now));
            active.updated_at = Set(now);
            active.update(&txn).await?
        }
        Some(existing) => {
            let mut active: shadow_account::ActiveModel = existing.into();
            active.synced_to_router = Set(false);
            active.updated_at = Set(now);
            active.update(&txn).await?
        }
        None => {
            let active = shadow_account::ActiveModel {
                id: NotSet,
                customer_id: Set(customer_id),
                router_id: Set(router_id),
                service_type: Set(desired.service.as_str().to_string()),
                username: Set(desired.username.clone()),
                password: Set(desired.password.clone()),
                profile: Set(desired.profile.clone()),
                mac_address: Set(desired.mac_address.clone()),
                status: Set(desired.status().to_string()),
                synced_to_router: Set(synced),
                last_sync: Set(if synced { Some(now) } else { None }),
                created_at: Set(now),
                updated_at: Set(now),
            };
            active.insert(&txn).await?
        }
    };

    txn.commit().await?;
    Ok(model)
}

/// 设备写入成功：影子记录覆盖为期望值并标记已同步
pub async fn record_synced(
    db: &DatabaseConnection,
    customer_id: i64,
    router_id: i64,
    desired: &DesiredAccount,
    now: NaiveDateTime,
) -> Result<shadow_account::Model> {
    upsert(db, customer_id, router_id, desired, true, now).await
}

/// 设备写入失败：首次尝试时也创建影子记录，标记未同步
pub async fn mark_unsynced(
    db: &DatabaseConnection,
    customer_id: i64,
    router_id: i64,
    desired: &DesiredAccount,
    now: NaiveDateTime,
) -> Result<shadow_account::Model> {
    upsert(db, customer_id, router_id, desired, false, now).await
}

/// 更新状态与同步标记
pub async fn set_state(
    db: &DatabaseConnection,
    shadow_id: i64,
    status: &str,
    synced: bool,
    now: NaiveDateTime,
) -> Result<()> {
    let txn = db.begin().await?;

    if let Some(existing) = ShadowAccount::find_by_id(shadow_id).one(&txn).await? {
        let mut active: shadow_account::ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.synced_to_router = Set(synced);
        if synced {
            active.last_sync = Set(Some(now));
        }
        active.updated_at = Set(now);
        active.update(&txn).await?;
    }

    txn.commit().await?;
    Ok(())
}
