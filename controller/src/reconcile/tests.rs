use std::time::Duration as StdDuration;

use chrono::Duration;
use common::Verb;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use super::*;
use crate::entity::shadow_account::STATUS_ENABLED;
use crate::testing::{
    harness, harness_with, link_plan, now, seed_customer, seed_plan, seed_router, seed_subscription,
};

const HOST_A: &str = "10.0.0.1";
const HOST_B: &str = "10.0.0.2";

#[tokio::test]
async fn test_activate_creates_secret_and_is_idempotent() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;
    link_plan(&h.db, plan.id, router.id).await;

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert_eq!(result, OpResult::ok());

    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("name"), Some("alice"));
    assert_eq!(secrets[0].get("password"), Some("alice-ppp"));
    assert_eq!(secrets[0].get("profile"), Some("10M"));
    assert_eq!(secrets[0].get("disabled"), Some("false"));

    let shadow = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert!(shadow.synced_to_router);
    assert_eq!(shadow.status, STATUS_ENABLED);

    let stored = Router::find_by_id(router.id).one(&h.db).await.unwrap().unwrap();
    assert!(stored.last_sync.is_some());

    // 第二次激活：不连接、不写入
    h.mock.clear_log();
    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(result.success);
    assert_eq!(h.mock.connect_count(HOST_A), 0);
    assert!(h.mock.calls(HOST_A).is_empty());
}

#[tokio::test]
async fn test_activate_both_services_only_where_customer_and_plan_overlap() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "bob", "both").await;
    let hotspot_plan = seed_plan(&h.db, "hs-5M", "hotspot", 2, 5).await;

    let result = h.reconciler.activate(&h.db, customer.id, hotspot_plan.id).await.unwrap();
    assert!(result.success);
    assert!(h.mock.records(HOST_A, "/ppp/secret").is_empty());

    let users = h.mock.records(HOST_A, "/ip/hotspot/user");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get("password"), Some("bob-hs"));

    // 客户只开通 PPPoE，套餐只含 Hotspot：无事可做
    let ppp_only = seed_customer(&h.db, "carol", "pppoe").await;
    h.mock.clear_log();
    let result = h.reconciler.activate(&h.db, ppp_only.id, hotspot_plan.id).await.unwrap();
    assert!(result.success);
    assert!(h.mock.all_write_calls().is_empty());
}

#[tokio::test]
async fn test_activate_missing_entities() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    let result = h.reconciler.activate(&h.db, 999, plan.id).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not found"));

    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let result = h.reconciler.activate(&h.db, customer.id, 999).await.unwrap();
    assert!(!result.success);
}

#[tokio::test]
async fn test_activate_without_any_router() {
    let h = harness().await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert_eq!(result, OpResult::fail(NO_ACTIVE_ROUTER));
}

#[tokio::test]
async fn test_inactive_linked_router_falls_back_to_active_routers() {
    let h = harness().await;
    let inactive = seed_router(&h.db, "old", HOST_A, false).await;
    seed_router(&h.db, "new", HOST_B, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;
    link_plan(&h.db, plan.id, inactive.id).await;

    let routers = target_routers(&h.db, &plan).await.unwrap();
    assert_eq!(routers.len(), 1);
    assert_eq!(routers[0].host, HOST_B);

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(result.success);
    assert_eq!(h.mock.connect_count(HOST_A), 0);
    assert_eq!(h.mock.records(HOST_B, "/ppp/secret").len(), 1);
}

#[tokio::test]
async fn test_drift_recovery_recreates_missing_secret() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let basic = seed_plan(&h.db, "5M", "pppoe", 2, 5).await;
    let premium = seed_plan(&h.db, "20M", "pppoe", 10, 20).await;

    assert!(h.reconciler.activate(&h.db, customer.id, basic.id).await.unwrap().success);

    // 设备被重置，只剩一条幽灵记录
    h.mock.clear_table(HOST_A, "/ppp/secret");
    h.mock.inject_ghost(HOST_A, "/ppp/secret");

    let result = h.reconciler.activate(&h.db, customer.id, premium.id).await.unwrap();
    assert!(result.success);

    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("profile"), Some("20M"));

    let adds = h
        .mock
        .write_calls(HOST_A)
        .into_iter()
        .filter(|c| c.verb == Verb::Add)
        .count();
    assert_eq!(adds, 2);
}

#[tokio::test]
async fn test_plan_change_writes_diff_and_kicks_session() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let basic = seed_plan(&h.db, "5M", "pppoe", 2, 5).await;
    let premium = seed_plan(&h.db, "20M", "pppoe", 10, 20).await;

    assert!(h.reconciler.activate(&h.db, customer.id, basic.id).await.unwrap().success);
    h.mock.seed(HOST_A, "/ppp/active", &[("name", "alice"), ("address", "10.10.0.5")]);
    h.mock.clear_log();

    assert!(h.reconciler.activate(&h.db, customer.id, premium.id).await.unwrap().success);

    let writes = h.mock.write_calls(HOST_A);
    let set = writes
        .iter()
        .find(|c| c.path == "/ppp/secret" && c.verb == Verb::Set)
        .unwrap();
    let keys: Vec<&str> = set.params.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec![".id", "profile"]);
    assert!(h.mock.records(HOST_A, "/ppp/active").is_empty());
}

#[tokio::test]
async fn test_unsynced_shadow_with_matching_device_does_not_kick_session() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    shadow::set_state(&h.db, record.id, STATUS_ENABLED, false, now()).await.unwrap();

    h.mock.seed(HOST_A, "/ppp/active", &[("name", "alice")]);
    h.mock.clear_log();

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    assert_eq!(h.mock.connect_count(HOST_A), 1);
    assert!(h.mock.write_calls(HOST_A).is_empty());
    assert_eq!(h.mock.records(HOST_A, "/ppp/active").len(), 1);

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert!(record.synced_to_router);
}

#[tokio::test]
async fn test_unreachable_router_marks_unsynced_and_other_router_proceeds() {
    let h = harness().await;
    let a = seed_router(&h.db, "site-a", HOST_A, true).await;
    let b = seed_router(&h.db, "site-b", HOST_B, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;
    h.mock.set_unreachable(HOST_A, true);

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("site-a: "));

    let shadow_a = shadow::find(&h.db, customer.id, ServiceType::Pppoe, a.id).await.unwrap().unwrap();
    assert!(!shadow_a.synced_to_router);
    let shadow_b = shadow::find(&h.db, customer.id, ServiceType::Pppoe, b.id).await.unwrap().unwrap();
    assert!(shadow_b.synced_to_router);
    assert_eq!(h.mock.records(HOST_B, "/ppp/secret").len(), 1);

    // 恢复后重试只补齐失败的路由器
    h.mock.set_unreachable(HOST_A, false);
    h.mock.clear_log();
    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    assert_eq!(h.mock.connect_count(HOST_A), 1);
    assert_eq!(h.mock.connect_count(HOST_B), 0);
    assert_eq!(h.mock.records(HOST_A, "/ppp/secret").len(), 1);
}

#[tokio::test]
async fn test_device_trap_is_reported_per_service() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "both").await;
    let plan = seed_plan(&h.db, "10M", "both", 5, 10).await;
    h.mock.inject_trap(HOST_A, "/ip/hotspot/user", Verb::Add, "failure: profile does not exist");

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Hotspot"));
    assert!(!error.contains("PPPoE"));

    let ppp = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    let hs = shadow::find(&h.db, customer.id, ServiceType::Hotspot, router.id).await.unwrap().unwrap();
    assert!(ppp.synced_to_router);
    assert!(!hs.synced_to_router);
    assert_eq!(h.mock.disconnect_count(HOST_A), 1);
}

#[tokio::test]
async fn test_hotspot_mac_binding_and_session_kick() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "dave", "hotspot").await;
    let mut active: customer::ActiveModel = customer.clone().into();
    active.hotspot_mac_address = Set(Some("aa:bb:cc:dd:ee:ff".to_string()));
    let customer = active.update(&h.db).await.unwrap();
    let plan = seed_plan(&h.db, "hs-5M", "hotspot", 2, 5).await;

    h.mock.seed(HOST_A, "/ip/hotspot/active", &[("user", "phone"), ("mac-address", "AA:BB:CC:DD:EE:FF")]);

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    let users = h.mock.records(HOST_A, "/ip/hotspot/user");
    assert_eq!(users[0].get("mac-address"), Some("AA:BB:CC:DD:EE:FF"));
    assert!(h.mock.records(HOST_A, "/ip/hotspot/active").is_empty());
}

#[tokio::test]
async fn test_suspend_disables_and_disconnects() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "both").await;
    let plan = seed_plan(&h.db, "10M", "both", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    h.mock.seed(HOST_A, "/ppp/active", &[("name", "alice")]);
    h.mock.seed(HOST_A, "/ip/hotspot/active", &[("user", "alice")]);
    h.mock.seed(HOST_A, "/ip/hotspot/cookie", &[("user", "alice")]);

    let result = h.reconciler.suspend(&h.db, customer.id).await.unwrap();
    assert_eq!(result, OpResult::ok());

    assert_eq!(h.mock.records(HOST_A, "/ppp/secret")[0].get("disabled"), Some("true"));
    assert_eq!(h.mock.records(HOST_A, "/ip/hotspot/user")[0].get("disabled"), Some("true"));
    assert!(h.mock.records(HOST_A, "/ppp/active").is_empty());
    assert!(h.mock.records(HOST_A, "/ip/hotspot/active").is_empty());
    assert!(h.mock.records(HOST_A, "/ip/hotspot/cookie").is_empty());

    for service in [ServiceType::Pppoe, ServiceType::Hotspot] {
        let record = shadow::find(&h.db, customer.id, service, router.id).await.unwrap().unwrap();
        assert_eq!(record.status, STATUS_DISABLED);
        assert!(record.synced_to_router);
    }

    // 重新激活会把账号启用回来
    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    assert_eq!(h.mock.records(HOST_A, "/ppp/secret")[0].get("disabled"), Some("false"));
}

#[tokio::test]
async fn test_suspend_tolerates_missing_device_entry() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    h.mock.clear_table(HOST_A, "/ppp/secret");

    let result = h.reconciler.suspend(&h.db, customer.id).await.unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_suspend_failure_keeps_record_unsynced() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    h.mock.inject_trap(HOST_A, "/ppp/secret", Verb::Set, "failure: device busy");

    let result = h.reconciler.suspend(&h.db, customer.id).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("PPPoE Disable: "));

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert_eq!(record.status, STATUS_DISABLED);
    assert!(!record.synced_to_router);
}

#[tokio::test]
async fn test_suspend_without_shadow_records_is_noop() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;

    let result = h.reconciler.suspend(&h.db, customer.id).await.unwrap();
    assert!(result.success);
    assert_eq!(h.mock.connect_count(HOST_A), 0);
}

#[tokio::test]
async fn test_concurrent_activate_and_suspend_stay_consistent() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;
    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    h.mock.set_latency(StdDuration::from_millis(5));

    let (r1, r2) = {
        let a = h.reconciler.clone();
        let b = h.reconciler.clone();
        let db_a = h.db.clone();
        let db_b = h.db.clone();
        let customer_id = customer.id;
        let plan_id = plan.id;
        tokio::join!(
            tokio::spawn(async move { b.suspend(&db_b, customer_id).await }),
            tokio::spawn(async move { a.activate(&db_a, customer_id, plan_id).await }),
        )
    };
    assert!(r1.unwrap().unwrap().success);
    assert!(r2.unwrap().unwrap().success);

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    let device_disabled = h.mock.records(HOST_A, "/ppp/secret")[0].get("disabled") == Some("true");
    assert_eq!(record.status == STATUS_DISABLED, device_disabled);
    assert!(record.synced_to_router);
}

#[tokio::test]
async fn test_sync_all_users_uses_latest_active_subscription() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let alice = seed_customer(&h.db, "alice", "pppoe").await;
    let bob = seed_customer(&h.db, "bob", "pppoe").await;
    let basic = seed_plan(&h.db, "5M", "pppoe", 2, 5).await;
    let premium = seed_plan(&h.db, "20M", "pppoe", 10, 20).await;

    let earlier = now() - Duration::days(2);
    seed_subscription(&h.db, alice.id, basic.id, "active", Duration::days(10), earlier).await;
    seed_subscription(&h.db, alice.id, premium.id, "active", Duration::days(10), now()).await;
    // 已过期 / 非活跃的订阅不参与
    seed_subscription(&h.db, bob.id, basic.id, "active", Duration::days(-1), now()).await;
    seed_subscription(&h.db, bob.id, premium.id, "suspended", Duration::days(10), now()).await;

    let batch = h.reconciler.sync_all_users(&h.db).await.unwrap();
    assert_eq!(batch.succeeded, vec!["alice".to_string()]);
    assert!(batch.failed.is_empty());

    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("profile"), Some("20M"));
}

#[tokio::test]
async fn test_batches_without_active_router_are_fatal() {
    let h = harness().await;
    seed_router(&h.db, "off", HOST_A, false).await;

    let users = h.reconciler.sync_all_users(&h.db).await.unwrap();
    assert_eq!(users.error.as_deref(), Some(NO_ACTIVE_ROUTER));
    let profiles = h.reconciler.sync_all_profiles(&h.db).await.unwrap();
    assert_eq!(profiles.error.as_deref(), Some(NO_ACTIVE_ROUTER));
    let garden = h.reconciler.sync_walled_garden(&h.db).await.unwrap();
    assert!(!garden.is_success());
}

#[tokio::test]
async fn test_sync_plan_pushes_profiles_idempotently() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let plan = seed_plan(&h.db, "10M", "both", 5, 10).await;

    let result = h.reconciler.sync_plan_to_routers(&h.db, plan.id).await.unwrap();
    assert!(result.success);

    let ppp = h.mock.records(HOST_A, "/ppp/profile");
    assert_eq!(ppp.len(), 1);
    assert_eq!(ppp[0].get("rate-limit"), Some("5M/10M"));
    assert_eq!(ppp[0].get("local-address"), Some("10.0.0.1"));
    assert_eq!(ppp[0].get("on-up"), Some(PPPOE_BYPASS_ON_UP));
    assert_eq!(ppp[0].get("on-down"), Some(PPPOE_BYPASS_ON_DOWN));

    let hs = h.mock.records(HOST_A, "/ip/hotspot/user/profile");
    assert_eq!(hs[0].get("rate-limit"), Some("5M/10M"));
    assert_eq!(hs[0].get("shared-users"), Some("1"));

    h.mock.clear_log();
    assert!(h.reconciler.sync_plan_to_routers(&h.db, plan.id).await.unwrap().success);
    assert!(h.mock.write_calls(HOST_A).is_empty());
}

#[tokio::test]
async fn test_sync_plan_without_bypass_scripts() {
    let settings = ReconcileSettings {
        pppoe_hotspot_bypass: false,
        ..ReconcileSettings::default()
    };
    let h = harness_with(settings).await;
    seed_router(&h.db, "core", HOST_A, true).await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.sync_plan_to_routers(&h.db, plan.id).await.unwrap().success);
    let ppp = h.mock.records(HOST_A, "/ppp/profile");
    assert_eq!(ppp[0].get("on-up"), None);
    assert!(h.mock.records(HOST_A, "/ip/hotspot/user/profile").is_empty());
}

#[tokio::test]
async fn test_sync_all_profiles_reports_per_plan() {
    let h = harness().await;
    seed_router(&h.db, "core", HOST_A, true).await;
    seed_plan(&h.db, "5M", "pppoe", 2, 5).await;
    seed_plan(&h.db, "hs", "hotspot", 1, 2).await;
    h.mock.inject_trap(HOST_A, "/ip/hotspot/user/profile", Verb::Add, "failure: out of memory");

    let batch = h.reconciler.sync_all_profiles(&h.db).await.unwrap();
    assert_eq!(batch.succeeded, vec!["5M".to_string()]);
    assert_eq!(batch.failed.len(), 1);
    assert!(batch.failed[0].starts_with("hs: core: Hotspot Profile: "));
}

#[tokio::test]
async fn test_sync_walled_garden() {
    let settings = ReconcileSettings {
        walled_garden: vec![
            WalledGardenEntry {
                dst_host: Some("*.paygate.example".to_string()),
                dst_address: None,
                address_list: None,
                dns_address: None,
                comment: Some("payments".to_string()),
            },
            WalledGardenEntry {
                dst_host: None,
                dst_address: Some("196.201.214.0/24".to_string()),
                address_list: Some("walled-garden".to_string()),
                dns_address: None,
                comment: None,
            },
            WalledGardenEntry {
                dst_host: Some("portal.lan".to_string()),
                dst_address: None,
                address_list: None,
                dns_address: Some("192.168.88.10".to_string()),
                comment: Some("portal".to_string()),
            },
        ],
        ..ReconcileSettings::default()
    };
    let h = harness_with(settings).await;
    seed_router(&h.db, "core", HOST_A, true).await;

    let batch = h.reconciler.sync_walled_garden(&h.db).await.unwrap();
    assert!(batch.is_success());
    assert_eq!(batch.succeeded, vec!["core".to_string()]);

    assert_eq!(h.mock.records(HOST_A, "/ip/hotspot/walled-garden").len(), 2);
    let dns = h.mock.records(HOST_A, "/ip/dns/static");
    assert_eq!(dns.len(), 1);
    assert_eq!(dns[0].get("name"), Some("portal.lan"));
    assert_eq!(dns[0].get("address"), Some("192.168.88.10"));
    let ip = h.mock.records(HOST_A, "/ip/hotspot/walled-garden/ip");
    assert_eq!(ip[0].get("action"), Some("accept"));
    let list = h.mock.records(HOST_A, "/ip/firewall/address-list");
    assert_eq!(list[0].get("list"), Some("walled-garden"));

    h.mock.clear_log();
    assert!(h.reconciler.sync_walled_garden(&h.db).await.unwrap().is_success());
    assert!(h.mock.write_calls(HOST_A).is_empty());
}

#[tokio::test]
async fn test_drift_recovery_without_desired_change() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    // 设备被重置，期望状态不变，仅影子记录标记为未同步
    h.mock.clear_table(HOST_A, "/ppp/secret");
    h.mock.inject_ghost(HOST_A, "/ppp/secret");
    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    shadow::set_state(&h.db, record.id, STATUS_ENABLED, false, now()).await.unwrap();
    h.mock.clear_log();

    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(result.success);

    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("name"), Some("alice"));
    assert_eq!(secrets[0].get("profile"), Some("10M"));

    let writes = h.mock.write_calls(HOST_A);
    assert!(!writes.iter().any(|c| c.path == "/ppp/secret" && c.verb == Verb::Set));
    assert_eq!(
        writes.iter().filter(|c| c.path == "/ppp/secret" && c.verb == Verb::Add).count(),
        1
    );

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert!(record.synced_to_router);
}

#[tokio::test]
async fn test_renamed_account_replaces_old_device_entry() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    h.mock.seed(HOST_A, "/ppp/active", &[("name", "alice"), ("address", "10.10.0.5")]);

    let mut active: customer::ActiveModel = customer.clone().into();
    active.pppoe_username = Set(Some("alice2".to_string()));
    let customer = active.update(&h.db).await.unwrap();

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("name"), Some("alice2"));
    assert!(h.mock.records(HOST_A, "/ppp/active").is_empty());

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert_eq!(record.username, "alice2");

    assert!(h.reconciler.suspend(&h.db, customer.id).await.unwrap().success);
    let enabled = h
        .mock
        .records(HOST_A, "/ppp/secret")
        .iter()
        .filter(|s| s.get("disabled") != Some("true"))
        .count();
    assert_eq!(enabled, 0);
}

#[tokio::test]
async fn test_rename_failure_keeps_old_name_for_retry() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "alice", "pppoe").await;
    let plan = seed_plan(&h.db, "10M", "pppoe", 5, 10).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    let mut active: customer::ActiveModel = customer.clone().into();
    active.pppoe_username = Set(Some("alice2".to_string()));
    let customer = active.update(&h.db).await.unwrap();

    h.mock.inject_trap(HOST_A, "/ppp/secret", Verb::Remove, "failure: device busy");
    let result = h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap();
    assert!(!result.success);

    let record = shadow::find(&h.db, customer.id, ServiceType::Pppoe, router.id).await.unwrap().unwrap();
    assert_eq!(record.username, "alice");
    assert!(!record.synced_to_router);

    h.mock.clear_traps();
    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    let secrets = h.mock.records(HOST_A, "/ppp/secret");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].get("name"), Some("alice2"));
}

#[tokio::test]
async fn test_cleared_mac_binding_is_pushed() {
    let h = harness().await;
    let router = seed_router(&h.db, "core", HOST_A, true).await;
    let customer = seed_customer(&h.db, "dave", "hotspot").await;
    let mut active: customer::ActiveModel = customer.clone().into();
    active.hotspot_mac_address = Set(Some("AA:BB:CC:DD:EE:FF".to_string()));
    let customer = active.update(&h.db).await.unwrap();
    let plan = seed_plan(&h.db, "hs-5M", "hotspot", 2, 5).await;

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    let mut active: customer::ActiveModel = customer.clone().into();
    active.hotspot_mac_address = Set(None);
    let customer = active.update(&h.db).await.unwrap();
    h.mock.clear_log();

    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);

    let users = h.mock.records(HOST_A, "/ip/hotspot/user");
    assert_eq!(common::utils::normalize_mac(users[0].get("mac-address")), None);
    let set = h
        .mock
        .write_calls(HOST_A)
        .into_iter()
        .find(|c| c.path == "/ip/hotspot/user" && c.verb == Verb::Set)
        .unwrap();
    assert!(set.params.iter().any(|(k, v)| k == "mac-address" && v.is_empty()));

    let record = shadow::find(&h.db, customer.id, ServiceType::Hotspot, router.id).await.unwrap().unwrap();
    assert_eq!(record.mac_address, None);
    assert!(record.synced_to_router);

    // 再次激活无变化
    h.mock.clear_log();
    assert!(h.reconciler.activate(&h.db, customer.id, plan.id).await.unwrap().success);
    assert_eq!(h.mock.connect_count(HOST_A), 0);
}
