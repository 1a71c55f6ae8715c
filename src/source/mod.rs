use crate::types::{ChangeType, RuleChange, RuleError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// 规则来源:批量加载与实时变更推送
#[async_trait]
pub trait RuleSource: Send + Sync + std::fmt::Debug {
    /// 加载全部规则记录
    async fn load_rules(&self) -> Result<Vec<Value>, RuleError>;

    /// 订阅实时变更,不支持推送的来源返回 None
    async fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<RuleChange>> {
        None
    }
}

/// 内存规则来源,`publish` 同时更新记录并推送给订阅者
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    records: RwLock<Vec<Value>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RuleChange>>>,
}

impl MemoryRuleSource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: RwLock::new(records),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub async fn publish(&self, change: RuleChange) {
        {
            let mut records = self.records.write().await;
            let id = change.rule_id().map(str::to_string);
            let existing = records
                .iter()
                .position(|r| r.get("id").and_then(Value::as_str) == id.as_deref());
            match (change.event_type, existing) {
                (ChangeType::Delete, Some(i)) => {
                    records.remove(i);
                }
                (ChangeType::Delete, None) => {}
                (_, Some(i)) => records[i] = change.record.clone(),
                (_, None) => records.push(change.record.clone()),
            }
        }

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        debug!(subscribers = subscribers.len(), "规则变更已推送");
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn load_rules(&self) -> Result<Vec<Value>, RuleError> {
        Ok(self.records.read().await.clone())
    }

    async fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<RuleChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        Some(rx)
    }
}

/// 从 JSON 文件加载规则,文件内容为记录数组或 `{"rules": [...]}`
#[derive(Debug, Clone)]
pub struct JsonFileRuleSource {
    path: PathBuf,
}

impl JsonFileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleSource for JsonFileRuleSource {
    async fn load_rules(&self) -> Result<Vec<Value>, RuleError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RuleError::Source(format!("读取 {} 失败: {}", self.path.display(), e)))?;
        let records = match serde_json::from_str::<Value>(&content)? {
            Value::Array(records) => records,
            Value::Object(mut obj) => match obj.remove("rules") {
                Some(Value::Array(records)) => records,
                _ => return Err(RuleError::Source("缺少 rules 数组".to_string())),
            },
            _ => return Err(RuleError::Source("规则文件必须是数组或对象".to_string())),
        };
        info!(path = %self.path.display(), count = records.len(), "已从文件加载规则");
        Ok(records)
    }
}
