use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("规则解析失败({rule_id}): {reason}")]
    Parse { rule_id: String, reason: String },

    #[error("规则校验失败({rule_id}): {}", .errors.join("; "))]
    Validation { rule_id: String, errors: Vec<String> },

    #[error("条件求值失败({field}): {reason}")]
    ConditionEvaluation { field: String, reason: String },

    #[error("动作执行失败({action}): {reason}")]
    ActionExecution { action: String, reason: String },

    #[error("规则执行失败({rule_id}): {reason}")]
    RuleExecution { rule_id: String, reason: String },

    #[error("循环依赖: {0}")]
    CircularDependency(String),

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("规则已存在: {0}")]
    DuplicateRule(String),

    #[error("执行上下文必须是 JSON 对象")]
    InvalidContext,

    #[error("规则来源错误: {0}")]
    Source(String),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("JSON 处理失败: {0}")]
    Json(String),
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        RuleError::Json(e.to_string())
    }
}

impl RuleError {
    pub fn parse(rule_id: impl Into<String>, reason: impl ToString) -> Self {
        RuleError::Parse {
            rule_id: rule_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn condition(field: impl Into<String>, reason: impl ToString) -> Self {
        RuleError::ConditionEvaluation {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub fn action(action: impl Into<String>, reason: impl ToString) -> Self {
        RuleError::ActionExecution {
            action: action.into(),
            reason: reason.to_string(),
        }
    }

    pub fn execution(rule_id: impl Into<String>, reason: impl ToString) -> Self {
        RuleError::RuleExecution {
            rule_id: rule_id.into(),
            reason: reason.to_string(),
        }
    }
}
