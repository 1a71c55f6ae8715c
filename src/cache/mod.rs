mod redis;

pub use self::redis::RedisRuleCache;

use crate::types::RuleError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// 规则批次缓存,避免每次初始化都从规则来源重新加载
#[async_trait]
pub trait RuleCache: Send + Sync + std::fmt::Debug {
    /// 未命中或已过期时返回 None
    async fn get(&self, key: &str) -> Result<Option<Value>, RuleError>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RuleError>;

    async fn delete(&self, key: &str) -> Result<(), RuleError>;
}

/// 进程内缓存
#[derive(Debug, Default)]
pub struct MemoryRuleCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl MemoryRuleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleCache for MemoryRuleCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RuleError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                debug!(key, "缓存已过期");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RuleError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RuleError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
