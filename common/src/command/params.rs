//! 设备条目参数
//!
//! 每种设备条目一个结构体，字段显式、类型化；可选字段用 `Option` 表示。
//! 属性中的空字符串只用于清除设备上已有的值。

use crate::api::Params;
use crate::utils::{is_truthy, normalize_mac};

/// 可按自然键查找并幂等写入的设备条目
pub trait DeviceEntry: Send + Sync {
    /// 设备菜单路径
    const PATH: &'static str;

    /// 自然键（查找条件）
    fn filters(&self) -> Params;

    /// 需要与设备保持一致的属性（存在时逐项比较）
    fn attributes(&self) -> Params {
        Vec::new()
    }

    /// 仅在创建时写入、更新时不比较的属性
    fn create_only(&self) -> Params {
        Vec::new()
    }

    /// 用于日志的描述
    fn describe(&self) -> String {
        let key = self
            .filters()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!("{} [{}]", Self::PATH, key)
    }
}

/// 比较设备返回值与期望值
pub fn attribute_matches(key: &str, actual: Option<&str>, desired: &str) -> bool {
    match key {
        "disabled" => is_truthy(actual) == is_truthy(Some(desired)),
        "mac-address" => normalize_mac(actual) == normalize_mac(Some(desired)),
        _ => actual.unwrap_or_default() == desired,
    }
}

fn yes_no(flag: bool) -> String {
    let value = if flag { "yes" } else { "no" };
    value.to_string()
}

fn pair(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// PPPoE 账号（`/ppp/secret`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppSecretParams {
    pub name: String,
    pub password: String,
    pub profile: String,
    pub disabled: bool,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
}

impl PppSecretParams {
    pub fn new(name: impl Into<String>, password: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            profile: profile.into(),
            disabled: false,
            local_address: None,
            remote_address: None,
            comment: None,
        }
    }
}

impl DeviceEntry for PppSecretParams {
    const PATH: &'static str = "/ppp/secret";

    fn filters(&self) -> Params {
        vec![pair("name", &self.name)]
    }

    fn attributes(&self) -> Params {
        let mut attrs = vec![
            pair("password", &self.password),
            pair("profile", &self.profile),
            pair("disabled", yes_no(self.disabled)),
        ];
        if let Some(addr) = &self.local_address {
            attrs.push(pair("local-address", addr));
        }
        if let Some(addr) = &self.remote_address {
            attrs.push(pair("remote-address", addr));
        }
        attrs
    }

    fn create_only(&self) -> Params {
        let mut attrs = vec![pair("service", "pppoe")];
        if let Some(comment) = &self.comment {
            attrs.push(pair("comment", comment));
        }
        attrs
    }
}

/// Hotspot 用户（`/ip/hotspot/user`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotUserParams {
    pub name: String,
    pub password: String,
    pub profile: String,
    pub disabled: bool,
    pub mac_address: Option<String>,
    /// 设备时长格式，如 `1d`
    pub limit_uptime: Option<String>,
    pub limit_bytes_total: Option<u64>,
    pub comment: Option<String>,
}

impl HotspotUserParams {
    pub fn new(name: impl Into<String>, password: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            profile: profile.into(),
            disabled: false,
            mac_address: None,
            limit_uptime: None,
            limit_bytes_total: None,
            comment: None,
        }
    }
}

impl DeviceEntry for HotspotUserParams {
    const PATH: &'static str = "/ip/hotspot/user";

    fn filters(&self) -> Params {
        vec![pair("name", &self.name)]
    }

    fn attributes(&self) -> Params {
        let mut attrs = vec![
            pair("password", &self.password),
            pair("profile", &self.profile),
            pair("disabled", yes_no(self.disabled)),
        ];
        // 未绑定时写空值，清除设备上残留的绑定
        let mac = normalize_mac(self.mac_address.as_deref()).unwrap_or_default();
        attrs.push(pair("mac-address", mac));
        if let Some(limit) = &self.limit_uptime {
            attrs.push(pair("limit-uptime", limit));
        }
        if let Some(limit) = self.limit_bytes_total {
            attrs.push(pair("limit-bytes-total", limit.to_string()));
        }
        attrs
    }

    fn create_only(&self) -> Params {
        self.comment
            .iter()
            .map(|c| pair("comment", c))
            .collect()
    }
}

/// PPP 限速配置（`/ppp/profile`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppProfileParams {
    pub name: String,
    pub rate_limit: Option<String>,
    pub local_address: Option<String>,
    pub dns_server: Option<String>,
    pub on_up: Option<String>,
    pub on_down: Option<String>,
}

impl DeviceEntry for PppProfileParams {
    const PATH: &'static str = "/ppp/profile";

    fn filters(&self) -> Params {
        vec![pair("name", &self.name)]
    }

    fn attributes(&self) -> Params {
        let mut attrs = Vec::new();
        if let Some(rate) = &self.rate_limit {
            attrs.push(pair("rate-limit", rate));
        }
        if let Some(script) = &self.on_up {
            attrs.push(pair("on-up", script));
        }
        if let Some(script) = &self.on_down {
            attrs.push(pair("on-down", script));
        }
        attrs
    }

    fn create_only(&self) -> Params {
        let mut attrs = Vec::new();
        if let Some(addr) = &self.local_address {
            attrs.push(pair("local-address", addr));
        }
        if let Some(dns) = &self.dns_server {
            attrs.push(pair("dns-server", dns));
        }
        attrs
    }
}

/// Hotspot 用户限速配置（`/ip/hotspot/user/profile`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotProfileParams {
    pub name: String,
    pub rate_limit: Option<String>,
    pub shared_users: Option<u32>,
}

impl DeviceEntry for HotspotProfileParams {
    const PATH: &'static str = "/ip/hotspot/user/profile";

    fn filters(&self) -> Params {
        vec![pair("name", &self.name)]
    }

    fn attributes(&self) -> Params {
        self.rate_limit
            .iter()
            .map(|rate| pair("rate-limit", rate))
            .collect()
    }

    fn create_only(&self) -> Params {
        self.shared_users
            .iter()
            .map(|n| pair("shared-users", n.to_string()))
            .collect()
    }
}

/// 防火墙地址列表条目（`/ip/firewall/address-list`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressListEntry {
    pub list: String,
    pub address: String,
    pub comment: Option<String>,
}

impl DeviceEntry for AddressListEntry {
    const PATH: &'static str = "/ip/firewall/address-list";

    fn filters(&self) -> Params {
        vec![pair("list", &self.list), pair("address", &self.address)]
    }

    fn create_only(&self) -> Params {
        self.comment.iter().map(|c| pair("comment", c)).collect()
    }
}

/// 围墙花园 IP 规则（`/ip/hotspot/walled-garden/ip`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalledGardenIp {
    pub dst_address: String,
    pub action: String,
    pub comment: Option<String>,
}

impl WalledGardenIp {
    pub fn accept(dst_address: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            dst_address: dst_address.into(),
            action: "accept".to_string(),
            comment,
        }
    }
}

impl DeviceEntry for WalledGardenIp {
    const PATH: &'static str = "/ip/hotspot/walled-garden/ip";

    fn filters(&self) -> Params {
        vec![pair("dst-address", &self.dst_address), pair("action", &self.action)]
    }

    fn create_only(&self) -> Params {
        self.comment.iter().map(|c| pair("comment", c)).collect()
    }
}

/// 围墙花园域名规则（`/ip/hotspot/walled-garden`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalledGardenHost {
    pub dst_host: String,
    pub comment: Option<String>,
}

impl DeviceEntry for WalledGardenHost {
    const PATH: &'static str = "/ip/hotspot/walled-garden";

    fn filters(&self) -> Params {
        vec![pair("dst-host", &self.dst_host)]
    }

    fn create_only(&self) -> Params {
        self.comment.iter().map(|c| pair("comment", c)).collect()
    }
}

/// 静态 DNS 记录（`/ip/dns/static`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsStaticEntry {
    pub name: String,
    pub address: String,
    pub comment: Option<String>,
}

impl DeviceEntry for DnsStaticEntry {
    const PATH: &'static str = "/ip/dns/static";

    fn filters(&self) -> Params {
        vec![pair("name", &self.name), pair("address", &self.address)]
    }

    fn create_only(&self) -> Params {
        self.comment.iter().map(|c| pair("comment", c)).collect()
    }
}
