use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 引用前序规则执行结果的字段前缀
pub const RULE_RESULT_PREFIX: &str = "rule_result_";

/// 单个条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// 上下文中的点分路径,或 `rule_result_<ruleId>`
    pub field: String,
    pub operator: Operator,
    /// 缺省为 None,显式的 null 为 `Some(Value::Null)`
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, alias = "logicalOperator")]
    pub logical_operator: LogicalOperator,
    /// 取反
    #[serde(default)]
    pub negated: bool,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value),
            logical_operator: LogicalOperator::And,
            negated: false,
        }
    }

    /// 不带比较值的条件,用于 is_null / is_not_null
    pub fn unary(field: impl Into<String>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
            logical_operator: LogicalOperator::And,
            negated: false,
        }
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// 若字段引用了其他规则的执行结果,返回该规则ID
    pub fn referenced_rule(&self) -> Option<&str> {
        self.field
            .strip_prefix(RULE_RESULT_PREFIX)
            .filter(|id| !id.is_empty())
    }
}

/// 字段一旦出现(包括 null)就是 Some,缺省由 `#[serde(default)]` 给出 None
pub(crate) fn explicit_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// 比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    In,
    NotIn,
    Regex,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// 是否需要比较值
    pub fn requires_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// 条件之间的逻辑连接
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}
