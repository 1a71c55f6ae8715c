use crate::types::{ConflictResolution, RuleError, DEFAULT_PRIORITY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 引擎配置,所有字段均有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 规则记录未给出 priority 时使用
    pub default_priority: i64,
    /// 规则记录未给出 conflict_resolution 时使用
    pub default_conflict_resolution: ConflictResolution,
    /// 为 true 时拒绝会形成循环依赖的变更,否则只在生成执行顺序时告警
    pub reject_dependency_cycles: bool,
    /// 合并策略会产生新规则,冲突解决最多重复的轮数
    pub max_resolution_passes: usize,
    pub cache_key: String,
    pub cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            default_conflict_resolution: ConflictResolution::Priority,
            reject_dependency_cycles: false,
            max_resolution_passes: 4,
            cache_key: "biz_rules:rules".to_string(),
            cache_ttl_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn from_json(content: &str) -> Result<Self, RuleError> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| RuleError::ConfigError(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| RuleError::ConfigError(e.to_string()))?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.max_resolution_passes == 0 {
            return Err(RuleError::ConfigError(
                "max_resolution_passes 必须大于 0".to_string(),
            ));
        }
        if self.cache_key.is_empty() {
            return Err(RuleError::ConfigError("cache_key 不能为空".to_string()));
        }
        Ok(())
    }
}
