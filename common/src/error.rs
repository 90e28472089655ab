//! 设备通信错误类型

use thiserror::Error;

/// 设备传输层 / 命令层错误
#[derive(Debug, Error)]
pub enum DeviceError {
    /// 无法连接到路由器（网络不可达、拒绝连接等）
    #[error("连接路由器失败: {0}")]
    Connection(String),

    /// 连接或命令超时（可重试）
    #[error("设备操作超时 ({0}s)")]
    Timeout(u64),

    /// 登录被拒绝
    #[error("路由器认证失败: {0}")]
    Auth(String),

    /// 按自然键查询不到目标条目
    #[error("{0} not found")]
    NotFound(String),

    /// 设备拒绝命令（!trap）
    #[error("设备拒绝命令: {message}")]
    Trap { category: Option<u32>, message: String },

    /// 设备关闭会话（!fatal）
    #[error("设备会话终止: {0}")]
    Fatal(String),

    /// 协议帧格式错误
    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// 是否为"条目不存在"（影子记录与设备状态漂移的信号）
    pub fn is_not_found(&self) -> bool {
        match self {
            DeviceError::NotFound(_) => true,
            DeviceError::Trap { message, .. } => is_missing_item_message(message),
            _ => false,
        }
    }

    /// 是否为传输层错误（连接、超时、IO、会话终止），下一轮调度可重试
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeviceError::Connection(_)
                | DeviceError::Timeout(_)
                | DeviceError::Auth(_)
                | DeviceError::Fatal(_)
                | DeviceError::Io(_)
        )
    }

    /// 将 !trap 映射为具体错误
    pub fn from_trap(category: Option<u32>, message: String) -> Self {
        if is_missing_item_message(&message) {
            DeviceError::NotFound(message)
        } else {
            DeviceError::Trap { category, message }
        }
    }
}

fn is_missing_item_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such item") || lower.contains("not found")
}
