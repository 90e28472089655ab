//! 用量采集
//!
//! 每个周期对所有启用的路由器：
//! 1. 采样 WAN 口实时吞吐
//! 2. 拉取 Hotspot / PPPoE 在线会话与字节计数，映射到客户并写入用量记录
//! 3. 同步在线会话表，删除本轮未出现的会话

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use common::utils::{normalize_mac, parse_queue_rate, parse_uptime, pppoe_user_from_interface, speed_mbps};
use common::{DeviceClient, DeviceConnector, DeviceError, Record};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::entity::{
    active_session, customer, router, router_interface_stat, subscription, usage_record, ActiveSession,
    Customer, RouterInterfaceStat, ServiceType, Subscription, UsageRecord,
};
use crate::reconcile::active_routers;

/// 设备上报的一个在线会话
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSample {
    pub service: ServiceType,
    /// 设备 `.id`
    pub device_id: String,
    pub username: String,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub uptime_seconds: u64,
    /// 简单队列上报的实时速率（上行, 下行）Mbps
    pub realtime_mbps: Option<(f64, f64)>,
}

impl SessionSample {
    /// 在线会话表中的会话 ID（不同服务的 `.id` 可能重复）
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.service.as_str(), self.device_id)
    }

    pub fn total_bytes(&self) -> u64 {
        self.upload_bytes.saturating_add(self.download_bytes)
    }
}

/// 用量记录的写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageChange {
    Created,
    Updated,
}

/// 一轮采集的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectReport {
    pub routers: usize,
    pub failed_routers: Vec<String>,
    pub sessions: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub skipped: usize,
    pub pruned: u64,
}

pub struct UsageCollector {
    connector: Arc<dyn DeviceConnector>,
    wan_interface: String,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl UsageCollector {
    pub fn new(connector: Arc<dyn DeviceConnector>, wan_interface: impl Into<String>) -> Self {
        Self {
            connector,
            wan_interface: wan_interface.into(),
        }
    }

    pub async fn collect_all(&self, db: &DatabaseConnection) -> Result<CollectReport> {
        self.collect_all_at(db, Utc::now().naive_utc()).await
    }

    /// 以给定时间执行一轮采集
    pub async fn collect_all_at(&self, db: &DatabaseConnection, now: NaiveDateTime) -> Result<CollectReport> {
        let routers = active_routers(db).await?;
        let mut report = CollectReport::default();

        if routers.is_empty() {
            warn!("没有启用的路由器，跳过用量采集");
            return Ok(report);
        }

        for router in routers {
            report.routers += 1;
            let mut client = match DeviceClient::connect(self.connector.as_ref(), &router.target()).await {
                Ok(client) => client,
                Err(e) => {
                    error!("采集 {} 用量失败: {}", router.name, e);
                    report.failed_routers.push(format!("{}: {}", router.name, e));
                    continue;
                }
            };

            let result = self.collect_router(db, &mut client, &router, now, &mut report).await;
            client.disconnect().await;
            result?;
        }

        info!(
            "📈 用量采集完成: {} 台路由器，{} 个会话，新建 {}，更新 {}，清理 {}",
            report.routers, report.sessions, report.records_created, report.records_updated, report.pruned
        );
        Ok(report)
    }

    async fn collect_router(
        &self,
        db: &DatabaseConnection,
        client: &mut DeviceClient,
        router: &router::Model,
        now: NaiveDateTime,
        report: &mut CollectReport,
    ) -> Result<()> {
        self.sample_wan(db, client, router, now).await?;

        let queues = match client.simple_queues().await {
            Ok(queues) => queue_rates(&queues),
            Err(e) => {
                debug!("{}: 读取简单队列失败: {}", router.name, e);
                HashMap::new()
            }
        };

        let hotspot = fetch_hotspot(client, &queues).await;
        let pppoe = fetch_pppoe(client, &queues).await;

        if let Err(e) = &hotspot {
            error!("{}: 读取 Hotspot 在线会话失败: {}", router.name, e);
        }
        if let Err(e) = &pppoe {
            error!("{}: 读取 PPPoE 在线会话失败: {}", router.name, e);
        }
        let complete = hotspot.is_ok() && pppoe.is_ok();

        let samples: Vec<SessionSample> = hotspot
            .unwrap_or_default()
            .into_iter()
            .chain(pppoe.unwrap_or_default())
            .collect();
        info!("{}: 在线会话 {} 个", router.name, samples.len());

        let mut seen = HashSet::new();
        for sample in &samples {
            report.sessions += 1;
            let Some(customer) = resolve_customer(db, sample).await? else {
                debug!("{}: 设备用户 {} 没有对应客户，跳过", router.name, sample.username);
                report.skipped += 1;
                continue;
            };

            upsert_active_session(db, router.id, customer.id, sample, now).await?;
            seen.insert(sample.session_key());

            match latest_active_subscription(db, customer.id).await? {
                Some(sub) => match update_usage_record(db, &sub, sample, now).await? {
                    UsageChange::Created => report.records_created += 1,
                    UsageChange::Updated => report.records_updated += 1,
                },
                None => {
                    debug!("客户 {} 没有有效订阅，不记录用量", customer.username);
                    report.skipped += 1;
                }
            }
        }

        // 任一查询失败时无法判断哪些会话已下线
        if complete {
            let pruned = prune_stale_sessions(db, router.id, &seen).await?;
            if pruned > 0 {
                info!("{}: 清理 {} 个已下线会话", router.name, pruned);
            }
            report.pruned += pruned;
        }
        Ok(())
    }

    async fn sample_wan(
        &self,
        db: &DatabaseConnection,
        client: &mut DeviceClient,
        router: &router::Model,
        now: NaiveDateTime,
    ) -> Result<()> {
        let record = match client.monitor_traffic(&self.wan_interface).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => {
                debug!("{}: 采样 {} 流量失败: {}", router.name, self.wan_interface, e);
                return Ok(());
            }
        };

        let wan_rx = record.get_u64("rx-bits-per-second").unwrap_or(0);
        let wan_tx = record.get_u64("tx-bits-per-second").unwrap_or(0);
        // 客户上行 = WAN 发送，客户下行 = WAN 接收
        upsert_interface_stat(db, router.id, &self.wan_interface, to_i64(wan_tx), to_i64(wan_rx), now).await?;
        debug!("{}: WAN 下行 {} bps，上行 {} bps", router.name, wan_rx, wan_tx);
        Ok(())
    }
}

fn queue_rates(queues: &[Record]) -> HashMap<String, (f64, f64)> {
    queues
        .iter()
        .filter_map(|q| {
            let name = q.get("name")?;
            let rate = parse_queue_rate(q.get("rate")?)?;
            Some((name.to_string(), rate))
        })
        .collect()
}

fn realtime_rate(queues: &HashMap<String, (f64, f64)>, service: ServiceType, username: &str) -> Option<(f64, f64)> {
    queues
        .get(&format!("<{}-{}>", service.as_str(), username))
        .or_else(|| queues.get(username))
        .copied()
}

async fn fetch_hotspot(
    client: &mut DeviceClient,
    queues: &HashMap<String, (f64, f64)>,
) -> Result<Vec<SessionSample>, DeviceError> {
    let sessions = client.hotspot_active().await?;

    Ok(sessions
        .iter()
        .filter_map(|s| {
            let username = s.get("user")?.to_string();
            Some(SessionSample {
                service: ServiceType::Hotspot,
                device_id: s.id()?.to_string(),
                ip_address: non_empty(s.get("address")),
                mac_address: normalize_mac(s.get("mac-address")),
                upload_bytes: s.get_u64("bytes-in").unwrap_or(0),
                download_bytes: s.get_u64("bytes-out").unwrap_or(0),
                uptime_seconds: parse_uptime(s.get("uptime").unwrap_or_default()),
                realtime_mbps: realtime_rate(queues, ServiceType::Hotspot, &username),
                username,
            })
        })
        .collect())
}

/// PPPoE 会话列表没有字节计数，计数取自同名动态接口
async fn fetch_pppoe(
    client: &mut DeviceClient,
    queues: &HashMap<String, (f64, f64)>,
) -> Result<Vec<SessionSample>, DeviceError> {
    let sessions = client.find("/ppp/active", &[]).await?;
    let interfaces = client.pppoe_interfaces().await?;

    let counters: HashMap<&str, (u64, u64)> = interfaces
        .iter()
        .filter_map(|i| {
            let name = pppoe_user_from_interface(i.get("name")?);
            let rx = i.get_u64("rx-byte").unwrap_or(0);
            let tx = i.get_u64("tx-byte").unwrap_or(0);
            Some((name, (rx, tx)))
        })
        .collect();

    Ok(sessions
        .iter()
        .filter_map(|s| {
            let username = s.get("name")?.to_string();
            let (upload, download) = counters.get(username.as_str()).copied().unwrap_or((0, 0));
            Some(SessionSample {
                service: ServiceType::Pppoe,
                device_id: s.id()?.to_string(),
                ip_address: non_empty(s.get("address")),
                mac_address: normalize_mac(s.get("caller-id")),
                upload_bytes: upload,
                download_bytes: download,
                uptime_seconds: parse_uptime(s.get("uptime").unwrap_or_default()),
                realtime_mbps: realtime_rate(queues, ServiceType::Pppoe, &username),
                username,
            })
        })
        .collect())
}

/// 按设备账号查找客户：先匹配该服务的专用账号，再匹配登录名
pub async fn resolve_customer(db: &DatabaseConnection, sample: &SessionSample) -> Result<Option<customer::Model>> {
    let service_column = match sample.service {
        ServiceType::Hotspot => customer::Column::HotspotUsername,
        _ => customer::Column::PppoeUsername,
    };

    if let Some(found) = Customer::find()
        .filter(service_column.eq(sample.username.as_str()))
        .one(db)
        .await?
    {
        return Ok(Some(found));
    }

    Ok(Customer::find()
        .filter(customer::Column::Username.eq(sample.username.as_str()))
        .one(db)
        .await?)
}

pub async fn latest_active_subscription(db: &DatabaseConnection, customer_id: i64) -> Result<Option<subscription::Model>> {
    Ok(Subscription::find()
        .filter(subscription::Column::CustomerId.eq(customer_id))
        .filter(subscription::Column::Status.eq(subscription::STATUS_ACTIVE))
        .order_by_desc(subscription::Column::CreatedAt)
        .order_by_desc(subscription::Column::Id)
        .one(db)
        .await?)
}

/// 写入用量记录
///
/// 没有记录或计数回退（新会话）时新建，否则原地更新计数与速率。
/// 速率优先使用队列实时值，否则按与上次更新的时间差计算。
pub async fn update_usage_record(
    db: &DatabaseConnection,
    sub: &subscription::Model,
    sample: &SessionSample,
    now: NaiveDateTime,
) -> Result<UsageChange> {
    let latest = UsageRecord::find()
        .filter(usage_record::Column::CustomerId.eq(sub.customer_id))
        .filter(usage_record::Column::SubscriptionId.eq(sub.id))
        .order_by_desc(usage_record::Column::CreatedAt)
        .order_by_desc(usage_record::Column::Id)
        .one(db)
        .await?;

    let current_total = to_i64(sample.total_bytes());
    let latest = match latest {
        Some(record) if current_total >= record.total_bytes() => record,
        previous => {
            if previous.is_some() {
                info!("{} 计数回退，视为新会话", sample.username);
            }
            let (up, down) = sample.realtime_mbps.unwrap_or((0.0, 0.0));
            usage_record::ActiveModel {
                id: NotSet,
                customer_id: Set(sub.customer_id),
                subscription_id: Set(sub.id),
                upload_bytes: Set(to_i64(sample.upload_bytes)),
                download_bytes: Set(to_i64(sample.download_bytes)),
                session_time_seconds: Set(to_i64(sample.uptime_seconds)),
                upload_speed_mbps: Set(up),
                download_speed_mbps: Set(down),
                session_id: Set(sample.device_id.clone()),
                framed_ip_address: Set(sample.ip_address.clone()),
                start_time: Set(now),
                end_time: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(db)
            .await?;
            debug!("新建 {} 的用量记录", sample.username);
            return Ok(UsageChange::Created);
        }
    };

    let (up, down) = match sample.realtime_mbps {
        Some(rate) => rate,
        None => {
            let elapsed = (now - latest.updated_at).num_milliseconds() as f64 / 1000.0;
            let delta_up = sample.upload_bytes.saturating_sub(latest.upload_bytes.max(0) as u64);
            let delta_down = sample.download_bytes.saturating_sub(latest.download_bytes.max(0) as u64);
            (speed_mbps(delta_up, elapsed), speed_mbps(delta_down, elapsed))
        }
    };

    let mut active: usage_record::ActiveModel = latest.into();
    active.upload_bytes = Set(to_i64(sample.upload_bytes));
    active.download_bytes = Set(to_i64(sample.download_bytes));
    active.upload_speed_mbps = Set(up);
    active.download_speed_mbps = Set(down);
    if sample.ip_address.is_some() {
        active.framed_ip_address = Set(sample.ip_address.clone());
    }
    if sample.uptime_seconds > 0 {
        active.session_time_seconds = Set(to_i64(sample.uptime_seconds));
    }
    active.updated_at = Set(now);
    active.update(db).await?;

    debug!("更新 {} 的用量记录 (↑{} ↓{} Mbps)", sample.username, up, down);
    Ok(UsageChange::Updated)
}

async fn upsert_active_session(
    db: &DatabaseConnection,
    router_id: i64,
    customer_id: i64,
    sample: &SessionSample,
    now: NaiveDateTime,
) -> Result<()> {
    let session_key = sample.session_key();
    let existing = ActiveSession::find()
        .filter(active_session::Column::RouterId.eq(router_id))
        .filter(active_session::Column::SessionId.eq(session_key.as_str()))
        .one(db)
        .await?;

    match existing {
        Some(session) => {
            let mut active: active_session::ActiveModel = session.into();
            active.customer_id = Set(customer_id);
            active.username = Set(sample.username.clone());
            active.ip_address = Set(sample.ip_address.clone());
            active.mac_address = Set(sample.mac_address.clone());
            active.upload_bytes = Set(to_i64(sample.upload_bytes));
            active.download_bytes = Set(to_i64(sample.download_bytes));
            active.uptime_seconds = Set(to_i64(sample.uptime_seconds));
            active.last_update = Set(now);
            active.update(db).await?;
        }
        None => {
            let uptime = Duration::seconds(to_i64(sample.uptime_seconds));
            active_session::ActiveModel {
                id: NotSet,
                router_id: Set(router_id),
                customer_id: Set(customer_id),
                session_type: Set(sample.service.as_str().to_string()),
                session_id: Set(session_key),
                username: Set(sample.username.clone()),
                ip_address: Set(sample.ip_address.clone()),
                mac_address: Set(sample.mac_address.clone()),
                upload_bytes: Set(to_i64(sample.upload_bytes)),
                download_bytes: Set(to_i64(sample.download_bytes)),
                uptime_seconds: Set(to_i64(sample.uptime_seconds)),
                start_time: Set(now - uptime),
                last_update: Set(now),
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}

async fn prune_stale_sessions(db: &DatabaseConnection, router_id: i64, seen: &HashSet<String>) -> Result<u64> {
    let mut condition = Condition::all().add(active_session::Column::RouterId.eq(router_id));
    if !seen.is_empty() {
        condition = condition.add(active_session::Column::SessionId.is_not_in(seen.iter().cloned()));
    }

    let result = ActiveSession::delete_many().filter(condition).exec(db).await?;
    Ok(result.rows_affected)
}

async fn upsert_interface_stat(
    db: &DatabaseConnection,
    router_id: i64,
    interface: &str,
    rx_bps: i64,
    tx_bps: i64,
    now: NaiveDateTime,
) -> Result<()> {
    let existing = RouterInterfaceStat::find()
        .filter(router_interface_stat::Column::RouterId.eq(router_id))
        .filter(router_interface_stat::Column::InterfaceName.eq(interface))
        .one(db)
        .await?;

    match existing {
        Some(stat) => {
            let mut active: router_interface_stat::ActiveModel = stat.into();
            active.rx_bps = Set(rx_bps);
            active.tx_bps = Set(tx_bps);
            active.updated_at = Set(now);
            active.update(db).await?;
        }
        None => {
            router_interface_stat::ActiveModel {
                id: NotSet,
                router_id: Set(router_id),
                interface_name: Set(interface.to_string()),
                rx_bps: Set(rx_bps),
                tx_bps: Set(tx_bps),
                updated_at: Set(now),
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}
