pub mod active_session;
pub mod customer;
pub mod plan;
pub mod plan_router;
pub mod router;
pub mod router_interface_stat;
pub mod shadow_account;
pub mod subscription;
pub mod usage_record;

pub use active_session::Entity as ActiveSession;
pub use customer::Entity as Customer;
pub use plan::Entity as Plan;
pub use plan_router::Entity as PlanRouter;
pub use router::Entity as Router;
pub use router_interface_stat::Entity as RouterInterfaceStat;
pub use shadow_account::Entity as ShadowAccount;
pub use subscription::Entity as Subscription;
pub use usage_record::Entity as UsageRecord;

use serde::{Deserialize, Serialize};

/// 服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Pppoe,
    Hotspot,
    Both,
}

impl ServiceType {
    /// 未知取值按 PPPoE 处理
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hotspot" => ServiceType::Hotspot,
            "both" => ServiceType::Both,
            _ => ServiceType::Pppoe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Pppoe => "pppoe",
            ServiceType::Hotspot => "hotspot",
            ServiceType::Both => "both",
        }
    }

    /// 日志/错误中使用的名称
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::Pppoe => "PPPoE",
            ServiceType::Hotspot => "Hotspot",
            ServiceType::Both => "PPPoE+Hotspot",
        }
    }

    /// 展开为具体服务（`Both` -> PPPoE + Hotspot）
    pub fn services(&self) -> Vec<ServiceType> {
        match self {
            ServiceType::Both => vec![ServiceType::Pppoe, ServiceType::Hotspot],
            other => vec![*other],
        }
    }

    pub fn includes(&self, service: ServiceType) -> bool {
        self.services().contains(&service)
    }

    /// 双方都启用的具体服务
    pub fn common_services(&self, other: ServiceType) -> Vec<ServiceType> {
        self.services()
            .into_iter()
            .filter(|s| other.includes(*s))
            .collect()
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
