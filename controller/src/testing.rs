//! 测试夹具：内存数据库 + 模拟路由器

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use common::mock::MockRouterOs;
use sea_orm::{ActiveModelTrait, DatabaseConnection, NotSet, Set};

use crate::entity::{customer, plan, plan_router, router, subscription};
use crate::reconcile::{NetworkReconciler, ReconcileSettings};

pub struct Harness {
    pub db: DatabaseConnection,
    pub mock: MockRouterOs,
    pub reconciler: Arc<NetworkReconciler>,
}

pub async fn harness() -> Harness {
    harness_with(ReconcileSettings::default()).await
}

pub async fn harness_with(settings: ReconcileSettings) -> Harness {
    let db = crate::migration::memory().await;
    let mock = MockRouterOs::new();
    let reconciler = Arc::new(NetworkReconciler::new(Arc::new(mock.clone()), settings));
    Harness { db, mock, reconciler }
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub async fn seed_router(db: &DatabaseConnection, name: &str, host: &str, active: bool) -> router::Model {
    let now = now();
    router::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        host: Set(host.to_string()),
        port: Set(8728),
        username: Set("admin".to_string()),
        password: Set("secret".to_string()),
        use_ssl: Set(false),
        is_active: Set(active),
        last_sync: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_customer(db: &DatabaseConnection, username: &str, service: &str) -> customer::Model {
    let now = now();
    customer::ActiveModel {
        id: NotSet,
        username: Set(username.to_string()),
        service_type: Set(service.to_string()),
        status: Set("active".to_string()),
        pppoe_username: Set(None),
        pppoe_password: Set(Some(format!("{}-ppp", username))),
        hotspot_username: Set(None),
        hotspot_password: Set(Some(format!("{}-hs", username))),
        hotspot_mac_address: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_plan(db: &DatabaseConnection, name: &str, service: &str, upload: i32, download: i32) -> plan::Model {
    let now = now();
    plan::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        service_type: Set(service.to_string()),
        upload_mbps: Set(upload),
        download_mbps: Set(download),
        profile_name: Set(name.to_string()),
        duration_value: Set(30),
        duration_unit: Set("days".to_string()),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn link_plan(db: &DatabaseConnection, plan_id: i64, router_id: i64) {
    plan_router::ActiveModel {
        id: NotSet,
        plan_id: Set(plan_id),
        router_id: Set(router_id),
    }
    .insert(db)
    .await
    .unwrap();
}

pub async fn seed_subscription(
    db: &DatabaseConnection,
    customer_id: i64,
    plan_id: i64,
    status: &str,
    expiry_in: Duration,
    created_at: NaiveDateTime,
) -> subscription::Model {
    let now = now();
    subscription::ActiveModel {
        id: NotSet,
        customer_id: Set(customer_id),
        plan_id: Set(plan_id),
        status: Set(status.to_string()),
        start_date: Set(now),
        expiry_date: Set(now + expiry_in),
        created_at: Set(created_at),
        updated_at: Set(created_at),
    }
    .insert(db)
    .await
    .unwrap()
}
