//! 设备命令集
//!
//! 所有写操作遵循"按自然键查询 -> 判断是否存在 -> 变更"：
//! - 不存在：按期望属性创建
//! - 存在：仅当属性不同时写入差异部分，避免无意义写入导致会话掉线
//!
//! 查询结果中缺少 `.id` 或自然键字段的记录一律视为不存在。

pub mod params;

use tracing::{debug, info};

use crate::api::{DeviceConnector, DeviceSession, Params, Record, RouterTarget, Verb};
use crate::error::DeviceError;

pub use params::{
    attribute_matches, AddressListEntry, DeviceEntry, DnsStaticEntry, HotspotProfileParams,
    HotspotUserParams, PppProfileParams, PppSecretParams, WalledGardenHost, WalledGardenIp,
};

/// 一次写操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl Outcome {
    /// 是否实际修改了设备
    pub fn wrote(&self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

/// 单个路由器上的命令客户端
///
/// 一次逻辑操作对应一个客户端：连接 -> 若干命令 -> `disconnect`。
pub struct DeviceClient {
    session: Box<dyn DeviceSession>,
    target: RouterTarget,
}

impl DeviceClient {
    pub async fn connect(connector: &dyn DeviceConnector, target: &RouterTarget) -> Result<Self, DeviceError> {
        let session = connector.connect(target).await?;
        Ok(Self {
            session,
            target: target.clone(),
        })
    }

    pub fn target(&self) -> &RouterTarget {
        &self.target
    }

    pub async fn disconnect(mut self) {
        self.session.disconnect().await;
        debug!("已断开路由器 {}", self.target);
    }

    /// 原始命令
    pub async fn call(&mut self, path: &str, verb: Verb, params: &[(String, String)]) -> Result<Vec<Record>, DeviceError> {
        self.session.call(path, verb, params).await
    }

    /// 按条件查询，只返回带 `.id` 且条件字段全部吻合的真实记录
    pub async fn find(&mut self, path: &str, filters: &[(String, String)]) -> Result<Vec<Record>, DeviceError> {
        let records = self.session.call(path, Verb::Get, filters).await?;
        let total = records.len();

        let matched: Vec<Record> = records
            .into_iter()
            .filter(|r| r.id().is_some())
            .filter(|r| filters.iter().all(|(k, v)| r.matches(k, v)))
            .collect();

        if matched.len() != total {
            debug!("{} 查询过滤掉 {} 条无效记录", path, total - matched.len());
        }
        Ok(matched)
    }

    async fn find_entry<E: DeviceEntry>(&mut self, entry: &E) -> Result<Option<Record>, DeviceError> {
        Ok(self.find(E::PATH, &entry.filters()).await?.into_iter().next())
    }

    /// 对已存在的记录写入差异属性
    async fn apply_diff<E: DeviceEntry>(&mut self, entry: &E, existing: &Record) -> Result<Outcome, DeviceError> {
        let diff: Params = entry
            .attributes()
            .into_iter()
            .filter(|(k, v)| !attribute_matches(k, existing.get(k), v))
            .collect();

        if diff.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        let id = existing
            .id()
            .ok_or_else(|| DeviceError::NotFound(entry.describe()))?;
        let mut params = vec![(".id".to_string(), id.to_string())];
        params.extend(diff);

        self.session.call(E::PATH, Verb::Set, &params).await?;
        info!("✏️ {} 已更新 {} ({})", self.target.name, entry.describe(), changed_keys(&params));
        Ok(Outcome::Updated)
    }

    /// 更新已有条目；条目不存在时返回 `NotFound`
    pub async fn update<E: DeviceEntry>(&mut self, entry: &E) -> Result<Outcome, DeviceError> {
        match self.find_entry(entry).await? {
            Some(existing) => self.apply_diff(entry, &existing).await,
            None => Err(DeviceError::NotFound(entry.describe())),
        }
    }

    /// 创建或更新条目
    pub async fn ensure<E: DeviceEntry>(&mut self, entry: &E) -> Result<Outcome, DeviceError> {
        if let Some(existing) = self.find_entry(entry).await? {
            return self.apply_diff(entry, &existing).await;
        }

        // 空值只用于清除已有属性，创建时不写
        let mut params = entry.filters();
        params.extend(entry.attributes().into_iter().filter(|(_, v)| !v.is_empty()));
        params.extend(entry.create_only());

        self.session.call(E::PATH, Verb::Add, &params).await?;
        info!("➕ {} 已创建 {}", self.target.name, entry.describe());
        Ok(Outcome::Created)
    }

    /// 删除所有匹配条目，返回删除数量
    pub async fn remove_matching(&mut self, path: &str, filters: &[(String, String)]) -> Result<usize, DeviceError> {
        let mut removed = 0;
        for record in self.find(path, filters).await? {
            let Some(id) = record.id() else { continue };
            match self.session.call(path, Verb::Remove, &[(".id".to_string(), id.to_string())]).await {
                Ok(_) => removed += 1,
                // 查询与删除之间条目已消失
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn set_disabled(&mut self, path: &str, name: &str, disabled: bool) -> Result<Outcome, DeviceError> {
        let filters = vec![("name".to_string(), name.to_string())];
        let Some(existing) = self.find(path, &filters).await?.into_iter().next() else {
            return Err(DeviceError::NotFound(format!("{} [name={}]", path, name)));
        };

        let desired = if disabled { "yes" } else { "no" };
        if attribute_matches("disabled", existing.get("disabled"), desired) {
            return Ok(Outcome::Unchanged);
        }

        let id = existing.id().unwrap_or_default().to_string();
        self.session
            .call(path, Verb::Set, &[(".id".to_string(), id), ("disabled".to_string(), desired.to_string())])
            .await?;
        info!("{} {} {} disabled={}", self.target.name, path, name, desired);
        Ok(Outcome::Updated)
    }

    // ---------- PPPoE ----------

    pub async fn update_pppoe_secret(&mut self, secret: &PppSecretParams) -> Result<Outcome, DeviceError> {
        self.update(secret).await
    }

    pub async fn ensure_pppoe_secret(&mut self, secret: &PppSecretParams) -> Result<Outcome, DeviceError> {
        self.ensure(secret).await
    }

    /// 删除 PPPoE 账号（账号改名时清理旧名）
    pub async fn remove_pppoe_secret(&mut self, name: &str) -> Result<usize, DeviceError> {
        self.remove_matching(PppSecretParams::PATH, &[("name".to_string(), name.to_string())]).await
    }

    pub async fn set_pppoe_secret_disabled(&mut self, name: &str, disabled: bool) -> Result<Outcome, DeviceError> {
        self.set_disabled(PppSecretParams::PATH, name, disabled).await
    }

    /// 按账号名踢下线 PPPoE 会话
    pub async fn disconnect_pppoe_session(&mut self, name: &str) -> Result<usize, DeviceError> {
        self.remove_matching("/ppp/active", &[("name".to_string(), name.to_string())]).await
    }

    /// PPPoE 动态接口（含字节计数）
    pub async fn pppoe_interfaces(&mut self) -> Result<Vec<Record>, DeviceError> {
        self.find("/interface", &[("type".to_string(), "pppoe-in".to_string())]).await
    }

    pub async fn ensure_ppp_profile(&mut self, profile: &PppProfileParams) -> Result<Outcome, DeviceError> {
        self.ensure(profile).await
    }

    // ---------- Hotspot ----------

    pub async fn ensure_hotspot_user(&mut self, user: &HotspotUserParams) -> Result<Outcome, DeviceError> {
        self.ensure(user).await
    }

    pub async fn remove_hotspot_user(&mut self, name: &str) -> Result<usize, DeviceError> {
        self.remove_matching(HotspotUserParams::PATH, &[("name".to_string(), name.to_string())]).await
    }

    pub async fn set_hotspot_user_disabled(&mut self, name: &str, disabled: bool) -> Result<Outcome, DeviceError> {
        self.set_disabled(HotspotUserParams::PATH, name, disabled).await
    }

    pub async fn disconnect_hotspot_session(&mut self, user: &str) -> Result<usize, DeviceError> {
        self.remove_matching("/ip/hotspot/active", &[("user".to_string(), user.to_string())]).await
    }

    pub async fn disconnect_hotspot_by_mac(&mut self, mac: &str) -> Result<usize, DeviceError> {
        self.remove_matching("/ip/hotspot/active", &[("mac-address".to_string(), mac.to_string())]).await
    }

    /// 删除登录 cookie，强制重新走门户认证
    pub async fn remove_hotspot_cookie(&mut self, user: &str) -> Result<usize, DeviceError> {
        self.remove_matching("/ip/hotspot/cookie", &[("user".to_string(), user.to_string())]).await
    }

    pub async fn hotspot_active(&mut self) -> Result<Vec<Record>, DeviceError> {
        self.find("/ip/hotspot/active", &[]).await
    }

    pub async fn ensure_hotspot_profile(&mut self, profile: &HotspotProfileParams) -> Result<Outcome, DeviceError> {
        self.ensure(profile).await
    }

    // ---------- 队列 / 流量 ----------

    pub async fn simple_queues(&mut self) -> Result<Vec<Record>, DeviceError> {
        self.find("/queue/simple", &[]).await
    }

    /// 采样一次接口实时流量
    pub async fn monitor_traffic(&mut self, interface: &str) -> Result<Option<Record>, DeviceError> {
        let params = vec![
            ("interface".to_string(), interface.to_string()),
            ("once".to_string(), String::new()),
        ];
        let records = self
            .session
            .call("/interface", Verb::Other("monitor-traffic".to_string()), &params)
            .await?;
        Ok(records.into_iter().next())
    }

    // ---------- 防火墙 / 围墙花园 ----------

    pub async fn ensure_address_list_entry(&mut self, entry: &AddressListEntry) -> Result<Outcome, DeviceError> {
        self.ensure(entry).await
    }

    pub async fn remove_address_list_entry(&mut self, list: &str, address: &str) -> Result<usize, DeviceError> {
        let filters = vec![
            ("list".to_string(), list.to_string()),
            ("address".to_string(), address.to_string()),
        ];
        self.remove_matching(AddressListEntry::PATH, &filters).await
    }

    pub async fn ensure_walled_garden_ip(&mut self, entry: &WalledGardenIp) -> Result<Outcome, DeviceError> {
        self.ensure(entry).await
    }

    pub async fn remove_walled_garden_ip(&mut self, dst_address: &str) -> Result<usize, DeviceError> {
        self.remove_matching(WalledGardenIp::PATH, &[("dst-address".to_string(), dst_address.to_string())])
            .await
    }

    pub async fn ensure_walled_garden_host(&mut self, entry: &WalledGardenHost) -> Result<Outcome, DeviceError> {
        self.ensure(entry).await
    }

    pub async fn ensure_dns_static(&mut self, entry: &DnsStaticEntry) -> Result<Outcome, DeviceError> {
        self.ensure(entry).await
    }
}

fn changed_keys(params: &[(String, String)]) -> String {
    params
        .iter()
        .filter(|(k, _)| k != ".id")
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
