//! 设备会话抽象 trait 定义
//!
//! 每次逻辑操作都通过连接器新建一个会话（连接 -> 操作 -> 断开），
//! 不在多个操作之间共享长连接，因此同一路由器无需额外加锁。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::frame::Record;
use crate::error::DeviceError;

/// 命令参数（属性名, 属性值）
pub type Params = Vec<(String, String)>;

/// 目标路由器的连接参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterTarget {
    /// 仅用于日志
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// 是否使用 TLS（API-SSL）
    pub secure: bool,
}

impl std::fmt::Display for RouterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

/// 命令动词
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    /// 查询（参数作为过滤条件）
    Get,
    Add,
    Set,
    Remove,
    /// 其它动词，如 `monitor-traffic`
    Other(String),
}

impl Verb {
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Get => "print",
            Verb::Add => "add",
            Verb::Set => "set",
            Verb::Remove => "remove",
            Verb::Other(name) => name.as_str(),
        }
    }

    /// 是否会修改设备状态
    pub fn is_write(&self) -> bool {
        matches!(self, Verb::Add | Verb::Set | Verb::Remove)
    }
}

/// 将一条命令编码为字序列（不含 `.tag`）
pub fn command_words(path: &str, verb: &Verb, params: &[(String, String)]) -> Vec<String> {
    let mut words = Vec::with_capacity(params.len() + 1);
    words.push(format!("{}/{}", path.trim_end_matches('/'), verb.as_str()));
    for (key, value) in params {
        match verb {
            Verb::Get => words.push(format!("?{}={}", key, value)),
            _ => words.push(format!("={}={}", key, value)),
        }
    }
    words
}

/// 单个路由器上的命令会话
#[async_trait]
pub trait DeviceSession: Send {
    /// 发送一条命令，返回零条或多条结果记录
    ///
    /// 空结果帧被归一化为空列表；没有任何属性的幽灵记录不会返回给调用方。
    async fn call(
        &mut self,
        path: &str,
        verb: Verb,
        params: &[(String, String)],
    ) -> Result<Vec<Record>, DeviceError>;

    /// 断开会话（所有退出路径都必须调用，永不失败）
    async fn disconnect(&mut self);
}

/// 会话连接器
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// 连接并认证到目标路由器
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_words_query_vs_attributes() {
        let params = vec![("name".to_string(), "alice".to_string())];
        assert_eq!(
            command_words("/ppp/secret", &Verb::Get, &params),
            vec!["/ppp/secret/print", "?name=alice"]
        );
        assert_eq!(
            command_words("/ppp/secret/", &Verb::Add, &params),
            vec!["/ppp/secret/add", "=name=alice"]
        );
        assert!(Verb::Remove.is_write());
        assert!(!Verb::Other("monitor-traffic".to_string()).is_write());
    }
}
