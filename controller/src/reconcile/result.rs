//! 对账操作的结构化结果

use serde::Serialize;

/// 没有任何可用路由器时的固定错误文本
pub const NO_ACTIVE_ROUTER: &str = "no active router configured";

/// 单实体操作结果（activate / suspend / sync_plan_to_routers）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// 无错误即成功，否则以 `separator` 拼接全部错误
    pub fn from_errors(errors: Vec<String>, separator: &str) -> Self {
        if errors.is_empty() {
            Self::ok()
        } else {
            Self::fail(errors.join(separator))
        }
    }
}

/// 批量操作结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// 整批无法执行的原因（如没有可用路由器）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn record(&mut self, name: String, result: &OpResult) {
        if result.success {
            self.succeeded.push(name);
        } else {
            let reason = result.error.as_deref().unwrap_or("unknown error");
            self.failed.push(format!("{}: {}", name, reason));
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}
