//! 显式事件分发
//!
//! 计费侧写入（订阅/客户/套餐保存）后调用对应的 `on_*` 方法入队网络事件，
//! 后台 worker 逐个取出并交给对账引擎执行。

use anyhow::Result;
use chrono::NaiveDateTime;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::entity::{customer, subscription};
use crate::reconcile::{NetworkReconciler, OpResult};
use crate::usage::latest_active_subscription;

/// 网络事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Activate { customer_id: i64, plan_id: i64 },
    Suspend { customer_id: i64 },
    SyncPlan { plan_id: i64 },
}

#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<NetworkEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NetworkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn enqueue(&self, event: NetworkEvent) -> Option<NetworkEvent> {
        match self.tx.send(event).await {
            Ok(()) => {
                debug!("事件已入队: {:?}", event);
                Some(event)
            }
            Err(e) => {
                warn!("事件队列已关闭，丢弃事件: {:?}", e.0);
                None
            }
        }
    }

    /// 订阅保存后：有效且未到期 -> 激活；过期/取消/暂停 -> 暂停
    pub async fn on_subscription_saved(&self, sub: &subscription::Model, now: NaiveDateTime) -> Option<NetworkEvent> {
        let event = match sub.status.as_str() {
            subscription::STATUS_ACTIVE if !sub.is_expired_at(now) => NetworkEvent::Activate {
                customer_id: sub.customer_id,
                plan_id: sub.plan_id,
            },
            subscription::STATUS_EXPIRED | subscription::STATUS_CANCELLED | subscription::STATUS_SUSPENDED => {
                NetworkEvent::Suspend {
                    customer_id: sub.customer_id,
                }
            }
            _ => return None,
        };
        self.enqueue(event).await
    }

    /// 客户保存后（服务类型、账号、MAC 可能变化）：按最新的有效订阅重新激活
    pub async fn on_customer_saved(&self, db: &DatabaseConnection, customer: &customer::Model) -> Result<Option<NetworkEvent>> {
        let Some(sub) = latest_active_subscription(db, customer.id).await? else {
            return Ok(None);
        };
        Ok(self
            .enqueue(NetworkEvent::Activate {
                customer_id: customer.id,
                plan_id: sub.plan_id,
            })
            .await)
    }

    /// 套餐保存后：新建套餐等待绑定路由器，已有套餐立即同步限速配置
    pub async fn on_plan_saved(&self, plan_id: i64, created: bool) -> Option<NetworkEvent> {
        if created {
            return None;
        }
        self.enqueue(NetworkEvent::SyncPlan { plan_id }).await
    }

    /// 套餐绑定的路由器发生变化
    pub async fn on_plan_routers_changed(&self, plan_id: i64) -> Option<NetworkEvent> {
        self.enqueue(NetworkEvent::SyncPlan { plan_id }).await
    }
}

/// 执行单个事件
pub async fn handle_event(db: &DatabaseConnection, reconciler: &NetworkReconciler, event: NetworkEvent) -> Result<OpResult> {
    match event {
        NetworkEvent::Activate { customer_id, plan_id } => reconciler.activate(db, customer_id, plan_id).await,
        NetworkEvent::Suspend { customer_id } => reconciler.suspend(db, customer_id).await,
        NetworkEvent::SyncPlan { plan_id } => reconciler.sync_plan_to_routers(db, plan_id).await,
    }
}

/// 启动事件 worker；按入队顺序逐个执行，同一客户的后续事件总是最后生效
pub fn spawn_worker(
    mut rx: mpsc::Receiver<NetworkEvent>,
    db: DatabaseConnection,
    reconciler: Arc<NetworkReconciler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📮 网络事件 worker 已启动");
        while let Some(event) = rx.recv().await {
            match handle_event(&db, &reconciler, event).await {
                Ok(result) if result.success => debug!("事件 {:?} 执行成功", event),
                Ok(result) => warn!("事件 {:?} 执行失败: {}", event, result.error.unwrap_or_default()),
                Err(e) => error!("事件 {:?} 执行出错: {:#}", event, e),
            }
        }
        info!("网络事件 worker 已退出");
    })
}
