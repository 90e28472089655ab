//! 网络对账引擎
//!
//! 将计费侧期望状态（有效订阅 -> 启用账号 + 套餐限速配置）收敛到各路由器：
//! - `activate`: 按影子记录计算最小设备写入集，无变化时完全不访问设备
//! - `suspend`: 在账号实际所在的路由器上禁用并踢下线
//! - `sync_*`: 批量版本，逐个实体执行并汇总成功/失败列表
//!
//! 每个路由器一次连接（连接 -> 操作 -> 断开），单个路由器失败不影响其它路由器。

pub mod locks;
pub mod result;
pub mod shadow;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::Utc;
use common::command::{
    AddressListEntry, DeviceEntry, DnsStaticEntry, HotspotProfileParams, PppProfileParams,
    WalledGardenHost, WalledGardenIp,
};
use common::{DeviceClient, DeviceConnector, DeviceError, Outcome};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WalledGardenEntry};
use crate::entity::shadow_account::STATUS_DISABLED;
use crate::entity::{
    customer, plan, plan_router, router, shadow_account, subscription, Customer, Plan, PlanRouter,
    Router, ServiceType, Subscription,
};

pub use locks::CustomerLocks;
pub use result::{BatchResult, OpResult, NO_ACTIVE_ROUTER};
use shadow::DesiredAccount;

/// PPPoE 用户上线后加入 Hotspot 绑定（免门户）
const PPPOE_BYPASS_ON_UP: &str =
    "/ip hotspot ip-binding add mac-address=$\"caller-id\" type=bypassed server=all comment=\"pppoe-$user\";";
/// PPPoE 用户下线后移除绑定
const PPPOE_BYPASS_ON_DOWN: &str = "/ip hotspot ip-binding remove [find comment=\"pppoe-$user\"];";

/// 写入设备侧配置时使用的参数
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub pppoe_hotspot_bypass: bool,
    pub profile_local_address: Option<String>,
    pub profile_dns_server: Option<String>,
    pub hotspot_shared_users: u32,
    pub walled_garden: Vec<WalledGardenEntry>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl From<&Config> for ReconcileSettings {
    fn from(config: &Config) -> Self {
        Self {
            pppoe_hotspot_bypass: config.pppoe_hotspot_bypass,
            profile_local_address: non_empty(&config.profile_local_address),
            profile_dns_server: non_empty(&config.profile_dns_server),
            hotspot_shared_users: config.hotspot_shared_users,
            walled_garden: config.walled_garden.clone(),
        }
    }
}

/// 对账引擎
pub struct NetworkReconciler {
    connector: Arc<dyn DeviceConnector>,
    locks: CustomerLocks,
    settings: ReconcileSettings,
}

impl NetworkReconciler {
    pub fn new(connector: Arc<dyn DeviceConnector>, settings: ReconcileSettings) -> Self {
        Self {
            connector,
            locks: CustomerLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// 启用客户在套餐目标路由器上的账号
    pub async fn activate(&self, db: &DatabaseConnection, customer_id: i64, plan_id: i64) -> Result<OpResult> {
        let _guard = self.locks.lock(customer_id).await;

        let Some(customer) = Customer::find_by_id(customer_id).one(db).await? else {
            return Ok(OpResult::fail(format!("customer #{} not found", customer_id)));
        };
        let Some(plan) = Plan::find_by_id(plan_id).one(db).await? else {
            return Ok(OpResult::fail(format!("plan #{} not found", plan_id)));
        };

        let services = customer.service_type().common_services(plan.service_type());
        if services.is_empty() {
            info!(
                "客户 {} ({}) 与套餐 {} ({}) 没有共同的服务类型，跳过",
                customer.username, customer.service_type, plan.name, plan.service_type
            );
            return Ok(OpResult::ok());
        }

        let routers = target_routers(db, &plan).await?;
        if routers.is_empty() {
            warn!("激活客户 {} 失败: {}", customer.username, NO_ACTIVE_ROUTER);
            return Ok(OpResult::fail(NO_ACTIVE_ROUTER));
        }

        let desired: Vec<DesiredAccount> = services
            .iter()
            .map(|service| DesiredAccount::for_customer(&customer, &plan, *service))
            .collect();

        let mut errors = Vec::new();
        for router in &routers {
            errors.extend(self.activate_on_router(db, &customer, router, &desired).await?);
        }

        if errors.is_empty() {
            info!("✅ 客户 {} 已激活（套餐 {}，{} 台路由器）", customer.username, plan.name, routers.len());
        } else {
            error!("❌ 客户 {} 激活存在错误: {}", customer.username, errors.join("; "));
        }
        Ok(OpResult::from_errors(errors, "; "))
    }

    async fn activate_on_router(
        &self,
        db: &DatabaseConnection,
        customer: &customer::Model,
        router: &router::Model,
        desired: &[DesiredAccount],
    ) -> Result<Vec<String>> {
        let mut pending = Vec::new();
        for account in desired {
            let existing = shadow::find(db, customer.id, account.service, router.id).await?;
            if shadow::needs_update(existing.as_ref(), account) {
                pending.push((account, existing.map(|record| record.username)));
            } else {
                debug!("{} {} 在 {} 上无变化，跳过设备调用", account.service.label(), account.username, router.name);
            }
        }

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut client = match DeviceClient::connect(self.connector.as_ref(), &router.target()).await {
            Ok(client) => client,
            Err(e) => {
                error!("连接路由器 {} 失败: {}", router.name, e);
                let now = Utc::now().naive_utc();
                for (account, _) in &pending {
                    shadow::mark_unsynced(db, customer.id, router.id, account, now).await?;
                }
                return Ok(vec![format!("{}: {}", router.name, e)]);
            }
        };

        let result = self.apply_accounts(db, &mut client, customer, router, &pending).await;
        client.disconnect().await;
        result
    }

    async fn apply_accounts(
        &self,
        db: &DatabaseConnection,
        client: &mut DeviceClient,
        customer: &customer::Model,
        router: &router::Model,
        pending: &[(&DesiredAccount, Option<String>)],
    ) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        let mut synced_any = false;

        for (account, previous) in pending {
            let now = Utc::now().naive_utc();
            match upsert_account(client, account, previous.as_deref()).await {
                Ok(outcome) => {
                    shadow::record_synced(db, customer.id, router.id, account, now).await?;
                    synced_any = true;

                    // 只有实际写入设备时才踢下线，迫使用户按新配置重新认证
                    if outcome.wrote() {
                        terminate_sessions(client, account).await;
                    }
                    info!(
                        "{} {} 已同步到 {} ({:?})",
                        account.service.label(),
                        account.username,
                        router.name,
                        outcome
                    );
                }
                Err(e) => {
                    error!(
                        "{} {} 同步到 {} 失败: {}",
                        account.service.label(),
                        account.username,
                        router.name,
                        e
                    );
                    shadow::mark_unsynced(db, customer.id, router.id, account, now).await?;
                    errors.push(format!("{} {}: {}", router.name, account.service.label(), e));
                }
            }
        }

        if synced_any {
            touch_router(db, router).await?;
        }
        Ok(errors)
    }

    /// 暂停客户：在影子记录所在的路由器上禁用账号、踢下线
    pub async fn suspend(&self, db: &DatabaseConnection, customer_id: i64) -> Result<OpResult> {
        let _guard = self.locks.lock(customer_id).await;

        let Some(customer) = Customer::find_by_id(customer_id).one(db).await? else {
            return Ok(OpResult::fail(format!("customer #{} not found", customer_id)));
        };

        let records = shadow::for_customer(db, customer.id).await?;
        if records.is_empty() {
            debug!("客户 {} 没有设备账号，无需暂停", customer.username);
            return Ok(OpResult::ok());
        }

        let mut errors = Vec::new();
        for record in records {
            let now = Utc::now().naive_utc();
            shadow::set_state(db, record.id, STATUS_DISABLED, false, now).await?;

            let service = ServiceType::parse(&record.service_type);
            let Some(router) = Router::find_by_id(record.router_id).one(db).await? else {
                errors.push(format!("{} Disable: router #{} not found", service.label(), record.router_id));
                continue;
            };

            let failures = self.suspend_on_router(&router, &record, service).await;
            shadow::set_state(db, record.id, STATUS_DISABLED, failures.is_empty(), Utc::now().naive_utc()).await?;
            errors.extend(failures);
        }

        if errors.is_empty() {
            info!("⏸️ 客户 {} 已暂停", customer.username);
        } else {
            error!("暂停客户 {} 存在错误: {}", customer.username, errors.join(", "));
        }
        Ok(OpResult::from_errors(errors, ", "))
    }

    async fn suspend_on_router(
        &self,
        router: &router::Model,
        record: &shadow_account::Model,
        service: ServiceType,
    ) -> Vec<String> {
        let label = service.label();
        let mut client = match DeviceClient::connect(self.connector.as_ref(), &router.target()).await {
            Ok(client) => client,
            Err(e) => return vec![format!("{} Disable: {}: {}", label, router.name, e)],
        };

        let mut errors = Vec::new();
        let username = record.username.as_str();

        let disabled = match service {
            ServiceType::Hotspot => client.set_hotspot_user_disabled(username, true).await,
            _ => client.set_pppoe_secret_disabled(username, true).await,
        };
        match disabled {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!("{} {} 在 {} 上不存在，视为已禁用", label, username, router.name);
            }
            Err(e) => errors.push(format!("{} Disable: {}", label, e)),
        }

        let kicked = match service {
            ServiceType::Hotspot => client.disconnect_hotspot_session(username).await,
            _ => client.disconnect_pppoe_session(username).await,
        };
        if let Err(e) = kicked {
            errors.push(format!("{} Disconnect: {}", label, e));
        }

        if service == ServiceType::Hotspot {
            // 删除 cookie 强制重新走门户，失败仅告警
            if let Err(e) = client.remove_hotspot_cookie(username).await {
                warn!("删除 {} 的 Hotspot cookie 失败: {}", username, e);
            }
        }

        client.disconnect().await;
        errors
    }

    /// 对所有有效订阅重新执行激活（每个客户取最新的一条）
    pub async fn sync_all_users(&self, db: &DatabaseConnection) -> Result<BatchResult> {
        if !has_active_router(db).await? {
            return Ok(BatchResult::fatal(NO_ACTIVE_ROUTER));
        }

        let now = Utc::now().naive_utc();
        let subscriptions = Subscription::find()
            .filter(subscription::Column::Status.eq(subscription::STATUS_ACTIVE))
            .filter(subscription::Column::ExpiryDate.gt(now))
            .order_by_desc(subscription::Column::CreatedAt)
            .order_by_desc(subscription::Column::Id)
            .all(db)
            .await?;

        let customer_ids: Vec<i64> = subscriptions.iter().map(|s| s.customer_id).collect();
        let names: HashMap<i64, String> = Customer::find()
            .filter(customer::Column::Id.is_in(customer_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|c| (c.id, c.username))
            .collect();

        let mut batch = BatchResult::default();
        let mut seen = HashSet::new();
        for sub in subscriptions {
            if !seen.insert(sub.customer_id) {
                continue;
            }
            let name = names
                .get(&sub.customer_id)
                .cloned()
                .unwrap_or_else(|| format!("customer #{}", sub.customer_id));

            match self.activate(db, sub.customer_id, sub.plan_id).await {
                Ok(result) => batch.record(name, &result),
                Err(e) => batch.failed.push(format!("{}: {:#}", name, e)),
            }
        }

        info!("📊 用户同步完成: 成功 {}，失败 {}", batch.succeeded.len(), batch.failed.len());
        Ok(batch)
    }

    /// 将套餐限速配置推送到其目标路由器
    pub async fn sync_plan_to_routers(&self, db: &DatabaseConnection, plan_id: i64) -> Result<OpResult> {
        let Some(plan) = Plan::find_by_id(plan_id).one(db).await? else {
            return Ok(OpResult::fail(format!("plan #{} not found", plan_id)));
        };

        let routers = target_routers(db, &plan).await?;
        if routers.is_empty() {
            return Ok(OpResult::fail(NO_ACTIVE_ROUTER));
        }

        info!("同步套餐 {} 到 {} 台路由器", plan.name, routers.len());
        let mut errors = Vec::new();
        for router in &routers {
            let mut client = match DeviceClient::connect(self.connector.as_ref(), &router.target()).await {
                Ok(client) => client,
                Err(e) => {
                    error!("同步套餐 {} 到 {} 失败: {}", plan.name, router.name, e);
                    errors.push(format!("{}: {}", router.name, e));
                    continue;
                }
            };

            let failures = self.push_profiles(&mut client, &plan).await;
            client.disconnect().await;

            if failures.is_empty() {
                info!("{}: 套餐 {} 限速配置已同步", router.name, plan.name);
            }
            errors.extend(failures.into_iter().map(|f| format!("{}: {}", router.name, f)));
        }

        Ok(OpResult::from_errors(errors, "; "))
    }

    async fn push_profiles(&self, client: &mut DeviceClient, plan: &plan::Model) -> Vec<String> {
        let service = plan.service_type();
        let mut errors = Vec::new();

        if service.includes(ServiceType::Hotspot) {
            let profile = HotspotProfileParams {
                name: plan.profile_name.clone(),
                rate_limit: Some(plan.rate_limit()),
                shared_users: Some(self.settings.hotspot_shared_users),
            };
            if let Err(e) = client.ensure_hotspot_profile(&profile).await {
                errors.push(format!("Hotspot Profile: {}", e));
            }
        }

        if service.includes(ServiceType::Pppoe) {
            let bypass = self.settings.pppoe_hotspot_bypass;
            let profile = PppProfileParams {
                name: plan.profile_name.clone(),
                rate_limit: Some(plan.rate_limit()),
                local_address: self.settings.profile_local_address.clone(),
                dns_server: self.settings.profile_dns_server.clone(),
                on_up: bypass.then(|| PPPOE_BYPASS_ON_UP.to_string()),
                on_down: bypass.then(|| PPPOE_BYPASS_ON_DOWN.to_string()),
            };
            if let Err(e) = client.ensure_ppp_profile(&profile).await {
                errors.push(format!("PPPoE Profile: {}", e));
            }
        }

        errors
    }

    /// 推送全部启用套餐的限速配置
    pub async fn sync_all_profiles(&self, db: &DatabaseConnection) -> Result<BatchResult> {
        if !has_active_router(db).await? {
            return Ok(BatchResult::fatal(NO_ACTIVE_ROUTER));
        }

        let plans = Plan::find()
            .filter(plan::Column::IsActive.eq(true))
            .order_by_asc(plan::Column::Id)
            .all(db)
            .await?;

        let mut batch = BatchResult::default();
        for plan in plans {
            match self.sync_plan_to_routers(db, plan.id).await {
                Ok(result) => batch.record(plan.name, &result),
                Err(e) => batch.failed.push(format!("{}: {:#}", plan.name, e)),
            }
        }

        info!("📊 套餐同步完成: 成功 {}，失败 {}", batch.succeeded.len(), batch.failed.len());
        Ok(batch)
    }

    /// 将配置中的围墙花园条目推送到所有启用的路由器
    pub async fn sync_walled_garden(&self, db: &DatabaseConnection) -> Result<BatchResult> {
        let routers = active_routers(db).await?;
        if routers.is_empty() {
            return Ok(BatchResult::fatal(NO_ACTIVE_ROUTER));
        }
        if self.settings.walled_garden.is_empty() {
            info!("未配置围墙花园条目");
            return Ok(BatchResult::default());
        }

        let mut batch = BatchResult::default();
        for router in routers {
            let mut client = match DeviceClient::connect(self.connector.as_ref(), &router.target()).await {
                Ok(client) => client,
                Err(e) => {
                    batch.failed.push(format!("{}: {}", router.name, e));
                    continue;
                }
            };

            let mut errors = Vec::new();
            for entry in &self.settings.walled_garden {
                if let Err(e) = push_walled_garden_entry(&mut client, entry).await {
                    errors.push(e.to_string());
                }
            }
            client.disconnect().await;

            if errors.is_empty() {
                batch.succeeded.push(router.name);
            } else {
                batch.failed.push(format!("{}: {}", router.name, errors.join(", ")));
            }
        }

        Ok(batch)
    }
}

async fn push_walled_garden_entry(client: &mut DeviceClient, entry: &WalledGardenEntry) -> Result<(), DeviceError> {
    if let Some(host) = &entry.dst_host {
        let rule = WalledGardenHost {
            dst_host: host.clone(),
            comment: entry.comment.clone(),
        };
        client.ensure_walled_garden_host(&rule).await?;

        if let Some(address) = &entry.dns_address {
            let record = DnsStaticEntry {
                name: host.clone(),
                address: address.clone(),
                comment: entry.comment.clone(),
            };
            client.ensure_dns_static(&record).await?;
        }
    }

    if let Some(address) = &entry.dst_address {
        let rule = WalledGardenIp::accept(address.clone(), entry.comment.clone());
        client.ensure_walled_garden_ip(&rule).await?;

        if let Some(list) = &entry.address_list {
            let item = AddressListEntry {
                list: list.clone(),
                address: address.clone(),
                comment: entry.comment.clone(),
            };
            client.ensure_address_list_entry(&item).await?;
        }
    }

    Ok(())
}

/// 写入账号：已有影子记录时先尝试更新，设备报告不存在（漂移）则转为创建
///
/// `previous` 为影子记录中的账号名；账号名变更时先移除旧账号，
/// 失败则整体失败，影子记录保留旧账号名以便重试。
async fn upsert_account(
    client: &mut DeviceClient,
    account: &DesiredAccount,
    previous: Option<&str>,
) -> Result<Outcome, DeviceError> {
    if let Some(old) = previous.filter(|old| *old != account.username) {
        retire_account(client, account.service, old).await?;
    }

    let existed = previous == Some(account.username.as_str());
    match account.service {
        ServiceType::Hotspot => upsert_entry(client, &account.hotspot_user(), existed).await,
        _ => upsert_entry(client, &account.ppp_secret(), existed).await,
    }
}

/// 移除改名前的旧账号并踢下线其会话
async fn retire_account(client: &mut DeviceClient, service: ServiceType, username: &str) -> Result<(), DeviceError> {
    let removed = match service {
        ServiceType::Hotspot => client.remove_hotspot_user(username).await?,
        _ => client.remove_pppoe_secret(username).await?,
    };
    info!("🔁 {} 旧账号 {} 已从 {} 移除 ({} 条)", service.label(), username, client.target().name, removed);

    let kicked = match service {
        ServiceType::Hotspot => client.disconnect_hotspot_session(username).await,
        _ => client.disconnect_pppoe_session(username).await,
    };
    if let Err(e) = kicked {
        warn!("断开旧账号 {} 会话失败: {}", username, e);
    }
    if service == ServiceType::Hotspot {
        if let Err(e) = client.remove_hotspot_cookie(username).await {
            warn!("删除 {} 的 Hotspot cookie 失败: {}", username, e);
        }
    }
    Ok(())
}

async fn upsert_entry<E: DeviceEntry>(client: &mut DeviceClient, entry: &E, existed: bool) -> Result<Outcome, DeviceError> {
    if existed {
        match client.update(entry).await {
            Err(e) if e.is_not_found() => {
                warn!("⚠️ {} 在 {} 上不存在（设备状态已漂移），重新创建", entry.describe(), client.target().name);
            }
            other => return other,
        }
    }
    client.ensure(entry).await
}

/// 踢下线现有会话（失败仅告警）
async fn terminate_sessions(client: &mut DeviceClient, account: &DesiredAccount) {
    let result = match account.service {
        ServiceType::Hotspot => client.disconnect_hotspot_session(&account.username).await,
        _ => client.disconnect_pppoe_session(&account.username).await,
    };
    if let Err(e) = result {
        warn!("断开 {} 会话失败: {}", account.username, e);
    }

    if let Some(mac) = &account.mac_address {
        if let Err(e) = client.disconnect_hotspot_by_mac(mac).await {
            warn!("按 MAC {} 断开会话失败: {}", mac, e);
        }
    }
}

async fn touch_router(db: &DatabaseConnection, router: &router::Model) -> Result<()> {
    let now = Utc::now().naive_utc();
    let mut active: router::ActiveModel = router.clone().into();
    active.last_sync = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await?;
    Ok(())
}

pub async fn active_routers(db: &DatabaseConnection) -> Result<Vec<router::Model>> {
    Ok(Router::find()
        .filter(router::Column::IsActive.eq(true))
        .order_by_asc(router::Column::Id)
        .all(db)
        .await?)
}

async fn has_active_router(db: &DatabaseConnection) -> Result<bool> {
    Ok(Router::find()
        .filter(router::Column::IsActive.eq(true))
        .count(db)
        .await?
        > 0)
}

/// 套餐的目标路由器：绑定且启用的路由器；为空时回退到全部启用的路由器
pub async fn target_routers(db: &DatabaseConnection, plan: &plan::Model) -> Result<Vec<router::Model>> {
    let router_ids: Vec<i64> = PlanRouter::find()
        .filter(plan_router::Column::PlanId.eq(plan.id))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.router_id)
        .collect();

    if !router_ids.is_empty() {
        let routers = Router::find()
            .filter(router::Column::Id.is_in(router_ids))
            .filter(router::Column::IsActive.eq(true))
            .order_by_asc(router::Column::Id)
            .all(db)
            .await?;
        if !routers.is_empty() {
            return Ok(routers);
        }
        warn!("套餐 {} 绑定的路由器均未启用，回退到全部启用的路由器", plan.name);
    }

    active_routers(db).await
}
