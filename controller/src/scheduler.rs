//! 周期任务：到期扫描、用量采集、全量用户同步

use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::billing::expire_subscriptions;
use crate::config::Config;
use crate::reconcile::NetworkReconciler;
use crate::usage::UsageCollector;

/// 按固定间隔重复执行任务；上一轮超时时跳过错过的 tick
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("⏱️ 周期任务 {} 已启动，间隔 {}s", name, period.as_secs());

        loop {
            interval.tick().await;
            task().await;
        }
    })
}

/// 启动到期扫描
pub fn start_expiry_sweep(db: DatabaseConnection, reconciler: Arc<NetworkReconciler>, every: Duration) -> JoinHandle<()> {
    spawn_periodic("expiry-sweep", every, move || {
        let db = db.clone();
        let reconciler = reconciler.clone();
        async move {
            if let Err(e) = expire_subscriptions(&db, &reconciler, Utc::now().naive_utc()).await {
                error!("到期扫描失败: {:#}", e);
            }
        }
    })
}

/// 启动用量采集
pub fn start_usage_poll(db: DatabaseConnection, collector: Arc<UsageCollector>, every: Duration) -> JoinHandle<()> {
    spawn_periodic("usage-poll", every, move || {
        let db = db.clone();
        let collector = collector.clone();
        async move {
            if let Err(e) = collector.collect_all(&db).await {
                error!("用量采集失败: {:#}", e);
            }
        }
    })
}

/// 启动全量用户一致性同步
pub fn start_user_sync(db: DatabaseConnection, reconciler: Arc<NetworkReconciler>, every: Duration) -> JoinHandle<()> {
    spawn_periodic("user-sync", every, move || {
        let db = db.clone();
        let reconciler = reconciler.clone();
        async move {
            match reconciler.sync_all_users(&db).await {
                Ok(batch) if !batch.is_success() => warn!(
                    "用户同步存在失败: {}",
                    batch.error.clone().unwrap_or_else(|| batch.failed.join("; "))
                ),
                Ok(_) => {}
                Err(e) => error!("用户同步失败: {:#}", e),
            }
        }
    })
}

/// 按配置启动全部周期任务
pub fn start_all(
    config: &Config,
    db: &DatabaseConnection,
    reconciler: Arc<NetworkReconciler>,
    collector: Arc<UsageCollector>,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![
        start_expiry_sweep(db.clone(), reconciler.clone(), Duration::from_secs(config.expiry_sweep_secs.max(1))),
        start_usage_poll(db.clone(), collector, Duration::from_secs(config.usage_poll_secs.max(1))),
    ];

    if config.user_sync_secs > 0 {
        handles.push(start_user_sync(db.clone(), reconciler, Duration::from_secs(config.user_sync_secs)));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, now, seed_customer, seed_plan, seed_router, seed_subscription};
    use chrono::Duration as ChronoDuration;
    use common::mock::MockRouterOs;
    use sea_orm::EntityTrait;

    #[tokio::test]
    async fn test_periodic_runs_first_tick_immediately() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_periodic("test", Duration::from_secs(3600), move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        });

        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_start_all_runs_expiry_sweep() {
        let h = harness().await;
        seed_router(&h.db, "core", "10.0.0.1", true).await;
        let customer = seed_customer(&h.db, "alice", "pppoe").await;
        let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;
        let due = seed_subscription(&h.db, customer.id, plan.id, "active", ChronoDuration::hours(-1), now()).await;

        let config = Config {
            user_sync_secs: 0,
            ..Config::default()
        };
        let collector = Arc::new(UsageCollector::new(Arc::new(MockRouterOs::new()), "ether1"));
        let handles = start_all(&config, &h.db, h.reconciler.clone(), collector);
        assert_eq!(handles.len(), 2);

        let mut expired = false;
        for _ in 0..100 {
            let sub = crate::entity::Subscription::find_by_id(due.id).one(&h.db).await.unwrap().unwrap();
            if sub.status == crate::entity::subscription::STATUS_EXPIRED {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(expired);

        for handle in handles {
            handle.abort();
        }
    }
}
