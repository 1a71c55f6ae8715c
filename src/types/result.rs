use crate::types::{ActionType, ConflictResolution, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 单个条件的求值结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub field: String,
    pub operator: Operator,
    pub expected_value: Option<Value>,
    /// 解析得到的实际值,路径解析失败时为 None
    pub actual_value: Option<Value>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 规则全部条件的求值结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionsOutcome {
    pub passed: bool,
    pub conditions: Vec<ConditionResult>,
}

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub target: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    /// 条件满足且动作已执行
    Success,
    /// 条件不满足
    Skipped,
    /// 规则执行过程中出错
    Error,
}

/// 一次执行中单条规则的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub outcome: RuleOutcome,
    pub passed: bool,
    pub conditions: Vec<ConditionResult>,
    pub actions: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl RuleExecutionResult {
    pub fn failed(rule_id: &str, rule_name: &str, error: String, duration_ms: f64) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            outcome: RuleOutcome::Error,
            passed: false,
            conditions: Vec::new(),
            actions: Vec::new(),
            error: Some(error),
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RuleOutcome::Success
    }
}

/// `execute_rules` 的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    /// 没有任何规则以错误结束
    pub success: bool,
    /// 条件满足并执行了动作的规则数
    pub executed_count: usize,
    /// 以规则ID为键
    pub results: BTreeMap<String, RuleExecutionResult>,
    /// 本次实际执行的顺序
    pub execution_order: Vec<String>,
}

/// 冲突来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// conflicts_with 显式声明
    Explicit,
    /// 动作互相矛盾
    Action,
    /// 条件互相矛盾
    Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Winner { winner: String, loser: String },
    BothDisabled,
    Merged { merged_rule_id: String },
    /// user_defined: 引擎不做处理
    Unresolved,
}

/// 冲突解决记录,按无序规则对保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// 排名较高的规则
    pub rule1: String,
    pub rule2: String,
    pub strategy: ConflictResolution,
    pub outcome: ResolutionOutcome,
    /// 合并失败后回退到优先级策略
    #[serde(default)]
    pub fallback: bool,
    /// 解决时两条规则的版本号
    pub rule_versions: (u64, u64),
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    pub fn disabled_rules(&self) -> Vec<&str> {
        match &self.outcome {
            ResolutionOutcome::Winner { loser, .. } => vec![loser.as_str()],
            ResolutionOutcome::BothDisabled | ResolutionOutcome::Merged { .. } => {
                vec![self.rule1.as_str(), self.rule2.as_str()]
            }
            ResolutionOutcome::Unresolved => Vec::new(),
        }
    }
}

/// 引擎状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub initialized: bool,
    /// 每次成功重建后递增
    pub revision: u64,
    pub total_rules: usize,
    pub active_rules: usize,
    pub disabled_rules: usize,
    pub inactive_rules: usize,
    pub rules_by_category: BTreeMap<String, usize>,
    pub conflict_pairs: usize,
    pub resolutions: usize,
    pub execution_order: Vec<String>,
    pub dependency_cycles: Vec<Vec<String>>,
    pub is_updating: bool,
    pub deferred_changes: usize,
}
