//! 订阅到期处理

use anyhow::Result;
use chrono::NaiveDateTime;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::{error, info};

use crate::entity::{customer, subscription, Customer, Subscription};
use crate::reconcile::NetworkReconciler;

pub const CUSTOMER_EXPIRED: &str = "expired";

/// 到期扫描：将已到期的有效订阅标记为过期、暂停客户网络
///
/// 返回成功暂停的数量。单个订阅处理失败不影响其它订阅。
pub async fn expire_subscriptions(db: &DatabaseConnection, reconciler: &NetworkReconciler, now: NaiveDateTime) -> Result<usize> {
    let expired = Subscription::find()
        .filter(subscription::Column::Status.eq(subscription::STATUS_ACTIVE))
        .filter(subscription::Column::ExpiryDate.lte(now))
        .order_by_asc(subscription::Column::Id)
        .all(db)
        .await?;

    if expired.is_empty() {
        return Ok(0);
    }
    info!("⏰ 发现 {} 个到期订阅", expired.len());

    let mut count = 0;
    for sub in expired {
        match expire_one(db, reconciler, sub, now).await {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => error!("处理到期订阅失败: {:#}", e),
        }
    }

    info!("到期扫描完成，已暂停 {} 个客户", count);
    Ok(count)
}

async fn expire_one(
    db: &DatabaseConnection,
    reconciler: &NetworkReconciler,
    sub: subscription::Model,
    now: NaiveDateTime,
) -> Result<bool> {
    let sub_id = sub.id;
    let customer_id = sub.customer_id;

    let mut active: subscription::ActiveModel = sub.into();
    active.status = Set(subscription::STATUS_EXPIRED.to_string());
    active.updated_at = Set(now);
    active.update(db).await?;

    let result = reconciler.suspend(db, customer_id).await?;

    if let Some(found) = Customer::find_by_id(customer_id).one(db).await? {
        let username = found.username.clone();
        let mut active: customer::ActiveModel = found.into();
        active.status = Set(CUSTOMER_EXPIRED.to_string());
        active.updated_at = Set(now);
        active.update(db).await?;

        if result.success {
            info!("客户 {} 订阅 #{} 已到期，网络已暂停", username, sub_id);
        } else {
            error!(
                "客户 {} 订阅 #{} 已到期，但暂停网络失败: {}",
                username,
                sub_id,
                result.error.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(result.success)
}
