mod action;
mod condition;
mod context;
mod error;
mod event;
mod result;

pub use action::*;
pub use condition::*;
pub use context::*;
pub use error::*;
pub use event::*;
pub use result::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 未指定优先级时使用的默认值
pub const DEFAULT_PRIORITY: i64 = 100;

/// 业务规则定义,序列化后的形态即规则记录(metadata 字段被展开到顶层)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// 规则唯一标识
    pub id: String,
    /// 规则名称
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RuleCategory,
    /// 优先级,数值越大越先执行
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// 条件列表,为空表示恒为真
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// 显式依赖的规则ID
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// 显式声明互斥的规则ID
    #[serde(default)]
    pub conflicts_with: BTreeSet<String>,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    #[serde(flatten)]
    pub metadata: RuleMetadata,
    /// 运行期统计,不参与序列化
    #[serde(skip)]
    pub execution_data: ExecutionData,
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn default_active() -> bool {
    true
}

impl Rule {
    /// 创建一条仅包含必填字段的规则
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: RuleCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            priority: DEFAULT_PRIORITY,
            is_active: true,
            conditions: Vec::new(),
            actions: Vec::new(),
            dependencies: BTreeSet::new(),
            conflicts_with: BTreeSet::new(),
            conflict_resolution: ConflictResolution::default(),
            metadata: RuleMetadata::default(),
            execution_data: ExecutionData::default(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_dependency(mut self, rule_id: impl Into<String>) -> Self {
        self.dependencies.insert(rule_id.into());
        self
    }

    pub fn with_conflict(mut self, rule_id: impl Into<String>) -> Self {
        self.conflicts_with.insert(rule_id.into());
        self
    }

    pub fn with_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// 是否为冲突合并生成的规则
    pub fn is_merged(&self) -> bool {
        !self.metadata.merged_from.is_empty()
    }

    /// 条件中通过 `rule_result_<id>` 引用的规则ID
    pub fn referenced_rule_results(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .filter_map(|condition| condition.referenced_rule())
    }
}

/// 规则分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    #[serde(alias = "staff_availability")]
    StaffAvailability,
    #[serde(alias = "shift_patterns")]
    ShiftPatterns,
    #[serde(alias = "business_constraints")]
    BusinessConstraints,
    #[serde(alias = "preference_rules")]
    PreferenceRules,
    #[serde(alias = "regulatory_compliance")]
    RegulatoryCompliance,
    Custom,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 6] = [
        RuleCategory::StaffAvailability,
        RuleCategory::ShiftPatterns,
        RuleCategory::BusinessConstraints,
        RuleCategory::PreferenceRules,
        RuleCategory::RegulatoryCompliance,
        RuleCategory::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::StaffAvailability => "staff-availability",
            RuleCategory::ShiftPatterns => "shift-patterns",
            RuleCategory::BusinessConstraints => "business-constraints",
            RuleCategory::PreferenceRules => "preference-rules",
            RuleCategory::RegulatoryCompliance => "regulatory-compliance",
            RuleCategory::Custom => "custom",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 冲突解决策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// 优先级高者胜出
    #[default]
    Priority,
    /// 最近更新者胜出
    Latest,
    /// 双方都被禁用
    Strict,
    /// 尝试合并为一条新规则
    Merge,
    /// 仅记录,由调用方通过事件自行处理
    UserDefined,
}

/// 规则元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// 每次更新递增
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 合并规则的来源规则ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
}

fn default_version() -> u64 {
    1
}

impl Default for RuleMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            created_by: None,
            version: default_version(),
            tags: Vec::new(),
            merged_from: Vec::new(),
        }
    }
}

/// 规则执行统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionData {
    pub times_executed: u64,
    /// 滚动平均执行耗时(毫秒)
    pub average_execution_ms: f64,
    pub last_executed: Option<DateTime<Utc>>,
    /// 滚动成功率,取值 0.0 ~ 1.0
    pub success_rate: f64,
}

impl ExecutionData {
    /// 记录一次执行,更新滚动平均值
    pub fn record(&mut self, duration_ms: f64, succeeded: bool, at: DateTime<Utc>) {
        self.times_executed += 1;
        let n = self.times_executed as f64;
        self.average_execution_ms += (duration_ms - self.average_execution_ms) / n;
        let sample = if succeeded { 1.0 } else { 0.0 };
        self.success_rate += (sample - self.success_rate) / n;
        self.last_executed = Some(at);
    }
}
