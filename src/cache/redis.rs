use super::RuleCache;
use crate::types::RuleError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Redis 缓存,值以 JSON 文本保存
#[derive(Clone)]
pub struct RedisRuleCache {
    url: String,
    conn: ConnectionManager,
}

impl fmt::Debug for RedisRuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRuleCache").field("url", &self.url).finish()
    }
}

impl RedisRuleCache {
    pub async fn connect(url: &str) -> Result<Self, RuleError> {
        let client = Client::open(url)
            .map_err(|e| RuleError::Cache(format!("Redis地址无效: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RuleError::Cache(format!("获取Redis连接失败: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            conn,
        })
    }
}

#[async_trait]
impl RuleCache for RedisRuleCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RuleError> {
        let mut conn = self.conn.clone();
        let text: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| RuleError::Cache(format!("Redis GET失败: {}", e)))?;
        debug!("Redis GET {} 命中: {}", key, text.is_some());
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let text = serde_json::to_string(value)?;
        let _: () = conn
            .set_ex(key, text, ttl.as_secs().max(1))
            .await
            .map_err(|e| RuleError::Cache(format!("Redis SETEX失败: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RuleError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| RuleError::Cache(format!("Redis DEL失败: {}", e)))?;
        Ok(())
    }
}
