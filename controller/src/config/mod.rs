//! Controller 配置模块

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// 围墙花园条目（未认证用户也可访问的目的地）
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WalledGardenEntry {
    /// 域名（写入 `/ip/hotspot/walled-garden`）
    #[serde(default)]
    pub dst_host: Option<String>,

    /// IP 或网段（写入 `/ip/hotspot/walled-garden/ip`）
    #[serde(default)]
    pub dst_address: Option<String>,

    /// 同时把 `dst_address` 加入该防火墙地址列表
    #[serde(default)]
    pub address_list: Option<String>,

    /// 为 `dst_host` 写入静态 DNS 解析（如本地门户地址）
    #[serde(default)]
    pub dns_address: Option<String>,

    #[serde(default)]
    pub comment: Option<String>,
}

/// Controller 配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// 数据库地址
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// 设备连接与单条命令超时（秒）
    #[serde(default = "default_device_timeout")]
    pub device_timeout_secs: u64,

    /// 到期扫描间隔（秒）
    #[serde(default = "default_expiry_sweep")]
    pub expiry_sweep_secs: u64,

    /// 用量采集间隔（秒）
    #[serde(default = "default_usage_poll")]
    pub usage_poll_secs: u64,

    /// 全量用户一致性同步间隔（秒），0 表示关闭
    #[serde(default)]
    pub user_sync_secs: u64,

    /// WAN 口名称，用于采集总吞吐
    #[serde(default = "default_wan_interface")]
    pub wan_interface: String,

    /// PPPoE 用户上线时自动加入 Hotspot IP 绑定（免门户认证）
    #[serde(default = "default_true")]
    pub pppoe_hotspot_bypass: bool,

    #[serde(default = "default_local_address")]
    pub profile_local_address: String,

    #[serde(default = "default_dns_server")]
    pub profile_dns_server: String,

    #[serde(default = "default_shared_users")]
    pub hotspot_shared_users: u32,

    /// 日志目录（不设置时输出到控制台）
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub walled_garden: Vec<WalledGardenEntry>,
}

fn default_database_url() -> String {
    "sqlite://data/netsync.db?mode=rwc".to_string()
}

fn default_device_timeout() -> u64 {
    10
}

fn default_expiry_sweep() -> u64 {
    3600
}

fn default_usage_poll() -> u64 {
    30
}

fn default_wan_interface() -> String {
    "ether1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_local_address() -> String {
    "10.0.0.1".to_string()
}

fn default_dns_server() -> String {
    "8.8.8.8,8.8.4.4".to_string()
}

fn default_shared_users() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            device_timeout_secs: default_device_timeout(),
            expiry_sweep_secs: default_expiry_sweep(),
            usage_poll_secs: default_usage_poll(),
            user_sync_secs: 0,
            wan_interface: default_wan_interface(),
            pppoe_hotspot_bypass: true,
            profile_local_address: default_local_address(),
            profile_dns_server: default_dns_server(),
            hotspot_shared_users: default_shared_users(),
            log_dir: None,
            walled_garden: Vec::new(),
        }
    }
}

impl Config {
    /// 读取配置：显式路径 > `controller.toml` > `../controller.toml` > 默认值，最后应用环境变量
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => vec![PathBuf::from("controller.toml"), PathBuf::from("../controller.toml")],
        };

        let mut config = None;
        for candidate in &candidates {
            if candidate.exists() {
                let content = fs::read_to_string(candidate)
                    .with_context(|| format!("无法读取配置文件: {}", candidate.display()))?;
                let parsed: Config = toml::from_str(&content)
                    .with_context(|| format!("解析配置文件失败: {}", candidate.display()))?;
                tracing::info!("📋 加载配置文件: {}", candidate.display());
                config = Some(parsed);
                break;
            }
        }

        let mut config = match (config, path) {
            (Some(c), _) => c,
            (None, Some(p)) => anyhow::bail!("配置文件不存在: {}", p.display()),
            (None, None) => {
                tracing::warn!("未找到配置文件，使用默认配置");
                Config::default()
            }
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("NETSYNC_DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = url;
            }
        }
    }
}

static CONFIG: OnceCell<Config> = OnceCell::const_new();

/// 设置全局配置（只在启动时调用一次）
pub fn set_config(config: Config) {
    if CONFIG.set(config).is_err() {
        tracing::warn!("全局配置已初始化，忽略重复设置");
    }
}

/// 获取全局配置
pub async fn get_config() -> &'static Config {
    CONFIG
        .get_or_init(|| async {
            Config::load(None).unwrap_or_else(|e| {
                tracing::error!("加载配置失败，使用默认配置: {:#}", e);
                Config::default()
            })
        })
        .await
}
