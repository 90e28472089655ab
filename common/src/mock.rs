//! 内存模拟路由器
//!
//! 按主机隔离的条目表 + 完整命令日志，用于断言设备调用次数。
//! 支持注入幽灵记录、指定命令的 !trap、不可达主机和调用延迟。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{DeviceConnector, DeviceSession, Params, Record, RouterTarget, Verb};
use crate::error::DeviceError;

/// 一条已执行的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub host: String,
    pub path: String,
    pub verb: Verb,
    pub params: Params,
}

#[derive(Default)]
struct MockState {
    tables: HashMap<(String, String), Vec<Record>>,
    calls: Vec<CallRecord>,
    unreachable: HashSet<String>,
    ghosts: HashSet<(String, String)>,
    traps: HashMap<(String, String, String), String>,
    monitor: HashMap<(String, String), Record>,
    connects: HashMap<String, usize>,
    disconnects: HashMap<String, usize>,
    latency: Option<Duration>,
    next_id: u64,
}

impl MockState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }
}

/// 模拟路由器（可克隆，克隆体共享状态）
#[derive(Clone, Default)]
pub struct MockRouterOs {
    state: Arc<Mutex<MockState>>,
}

fn normalize_value(key: &str, value: &str) -> String {
    if key == "disabled" {
        match value {
            "yes" => return "true".to_string(),
            "no" => return "false".to_string(),
            _ => {}
        }
    }
    value.to_string()
}

impl MockRouterOs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 预置一条设备条目，返回分配的 `.id`
    pub fn seed(&self, host: &str, path: &str, attrs: &[(&str, &str)]) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut record = Record::from_pairs(attrs.iter().map(|(k, v)| (k.to_string(), normalize_value(k, v))));
        record.insert(".id", id.clone());
        state
            .tables
            .entry((host.to_string(), path.to_string()))
            .or_default()
            .push(record);
        id
    }

    pub fn records(&self, host: &str, path: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(&(host.to_string(), path.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// 清空某路径下的全部条目（模拟设备重置）
    pub fn clear_table(&self, host: &str, path: &str) {
        self.lock().tables.remove(&(host.to_string(), path.to_string()));
    }

    pub fn calls(&self, host: &str) -> Vec<CallRecord> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.host == host)
            .cloned()
            .collect()
    }

    pub fn write_calls(&self, host: &str) -> Vec<CallRecord> {
        self.calls(host).into_iter().filter(|c| c.verb.is_write()).collect()
    }

    pub fn all_write_calls(&self) -> Vec<CallRecord> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.verb.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.connects.clear();
        state.disconnects.clear();
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(host.to_string());
        } else {
            state.unreachable.remove(host);
        }
    }

    /// 查询该路径时额外返回一条没有 `.id` 与自然键的记录
    pub fn inject_ghost(&self, host: &str, path: &str) {
        self.lock().ghosts.insert((host.to_string(), path.to_string()));
    }

    /// 让指定命令返回 !trap
    pub fn inject_trap(&self, host: &str, path: &str, verb: Verb, message: &str) {
        self.lock().traps.insert(
            (host.to_string(), path.to_string(), verb.as_str().to_string()),
            message.to_string(),
        );
    }

    pub fn clear_traps(&self) {
        self.lock().traps.clear();
    }

    pub fn set_monitor(&self, host: &str, interface: &str, attrs: &[(&str, &str)]) {
        let record = Record::from_pairs(attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self.lock()
            .monitor
            .insert((host.to_string(), interface.to_string()), record);
    }

    /// 每条命令执行前的等待时间
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn connect_count(&self, host: &str) -> usize {
        self.lock().connects.get(host).copied().unwrap_or(0)
    }

    pub fn disconnect_count(&self, host: &str) -> usize {
        self.lock().disconnects.get(host).copied().unwrap_or(0)
    }

    fn execute(&self, host: &str, path: &str, verb: &Verb, params: &[(String, String)]) -> Result<Vec<Record>, DeviceError> {
        let mut state = self.lock();
        state.calls.push(CallRecord {
            host: host.to_string(),
            path: path.to_string(),
            verb: verb.clone(),
            params: params.to_vec(),
        });

        let trap_key = (host.to_string(), path.to_string(), verb.as_str().to_string());
        if let Some(message) = state.traps.get(&trap_key) {
            return Err(DeviceError::from_trap(None, message.clone()));
        }

        let table_key = (host.to_string(), path.to_string());
        match verb {
            Verb::Get => {
                let mut result = Vec::new();
                if state.ghosts.contains(&table_key) {
                    result.push(Record::from_pairs([(".tag", "5")]));
                }
                if let Some(table) = state.tables.get(&table_key) {
                    result.extend(
                        table
                            .iter()
                            .filter(|r| params.iter().all(|(k, v)| r.matches(k, v)))
                            .cloned(),
                    );
                }
                Ok(result)
            }
            Verb::Add => {
                let name = params.iter().find(|(k, _)| k == "name").map(|(_, v)| v.clone());
                if let (Some(name), Some(table)) = (&name, state.tables.get(&table_key)) {
                    if table.iter().any(|r| r.matches("name", name)) {
                        return Err(DeviceError::from_trap(
                            Some(6),
                            "failure: entry with the same name already exists".to_string(),
                        ));
                    }
                }
                let id = state.allocate_id();
                let mut record = Record::from_pairs(params.iter().map(|(k, v)| (k.clone(), normalize_value(k, v))));
                record.insert(".id", id);
                state.tables.entry(table_key).or_default().push(record);
                Ok(Vec::new())
            }
            Verb::Set | Verb::Remove => {
                let id = params
                    .iter()
                    .find(|(k, _)| k == ".id")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let table = state.tables.entry(table_key).or_default();
                let Some(pos) = table.iter().position(|r| r.id() == Some(id.as_str())) else {
                    return Err(DeviceError::from_trap(None, "no such item".to_string()));
                };
                if *verb == Verb::Remove {
                    table.remove(pos);
                } else {
                    for (k, v) in params.iter().filter(|(k, _)| k != ".id") {
                        table[pos].insert(k.clone(), normalize_value(k, v));
                    }
                }
                Ok(Vec::new())
            }
            Verb::Other(name) if name == "monitor-traffic" => {
                let interface = params
                    .iter()
                    .find(|(k, _)| k == "interface")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                Ok(state
                    .monitor
                    .get(&(host.to_string(), interface))
                    .cloned()
                    .into_iter()
                    .collect())
            }
            Verb::Other(_) => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl DeviceConnector for MockRouterOs {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let mut state = self.lock();
        if state.unreachable.contains(&target.host) {
            return Err(DeviceError::Connection(format!("{}: connection refused", target.host)));
        }
        *state.connects.entry(target.host.clone()).or_default() += 1;
        drop(state);

        Ok(Box::new(MockSession {
            host: target.host.clone(),
            router: self.clone(),
        }))
    }
}

struct MockSession {
    host: String,
    router: MockRouterOs,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn call(&mut self, path: &str, verb: Verb, params: &[(String, String)]) -> Result<Vec<Record>, DeviceError> {
        let latency = self.router.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.router.execute(&self.host, path, &verb, params)
    }

    async fn disconnect(&mut self) {
        let mut state = self.router.lock();
        *state.disconnects.entry(self.host.clone()).or_default() += 1;
    }
}
