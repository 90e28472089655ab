//! 结果帧与记录
//!
//! 设备每条命令返回零个或多个结果帧。空结果帧（`!empty`）是一等变体，
//! 由会话层归一化为空结果列表，不作为异常帧处理。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// 设备返回的单条记录（属性名 -> 属性值）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    attrs: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            attrs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|v| v.as_str())
    }

    /// 设备内部 ID（`.id`）
    pub fn id(&self) -> Option<&str> {
        self.get(".id").filter(|id| !id.is_empty())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.attrs.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// 幽灵记录：没有任何属性的结果（空结果帧的残留）
    pub fn is_ghost(&self) -> bool {
        self.attrs.is_empty()
    }

    /// 判断记录的某属性是否等于给定值
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.attrs.iter()
    }
}

/// 结果帧
#[derive(Debug, Clone, PartialEq)]
pub enum ResultFrame {
    /// `!done`：命令结束，可能带返回值（如 `=ret=`）
    Done { tag: Option<String>, attrs: Record },
    /// `!re`：一条数据记录
    Reply { tag: Option<String>, record: Record },
    /// `!empty`：命令已接受但没有数据
    Empty { tag: Option<String> },
    /// `!trap`：命令被拒绝
    Trap { tag: Option<String>, category: Option<u32>, message: String },
    /// `!fatal`：会话被设备关闭
    Fatal(String),
}

impl ResultFrame {
    /// 从一个句子解析结果帧
    pub fn parse(words: &[String]) -> Result<Self, DeviceError> {
        let (kind, rest) = words
            .split_first()
            .ok_or_else(|| DeviceError::Protocol("空的回复句子".to_string()))?;

        if kind == "!fatal" {
            let message = rest.iter()
                .map(|w| w.strip_prefix("=message=").unwrap_or(w))
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(ResultFrame::Fatal(message));
        }

        let mut tag = None;
        let mut attrs = Record::new();
        for word in rest {
            if let Some(value) = word.strip_prefix(".tag=") {
                tag = Some(value.to_string());
            } else if let Some(pair) = word.strip_prefix('=') {
                match pair.split_once('=') {
                    Some((key, value)) => attrs.insert(key, value),
                    None => attrs.insert(pair, ""),
                }
            }
        }

        match kind.as_str() {
            "!done" => Ok(ResultFrame::Done { tag, attrs }),
            "!re" => Ok(ResultFrame::Reply { tag, record: attrs }),
            "!empty" => Ok(ResultFrame::Empty { tag }),
            "!trap" => {
                let category = attrs.get("category").and_then(|c| c.parse().ok());
                let message = attrs.get("message").unwrap_or("unknown error").to_string();
                Ok(ResultFrame::Trap { tag, category, message })
            }
            other => Err(DeviceError::Protocol(format!("未知的回复类型: {}", other))),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            ResultFrame::Done { tag, .. }
            | ResultFrame::Reply { tag, .. }
            | ResultFrame::Empty { tag }
            | ResultFrame::Trap { tag, .. } => tag.as_deref(),
            ResultFrame::Fatal(_) => None,
        }
    }
}
