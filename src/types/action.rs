use super::condition::explicit_value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 规则条件满足时执行的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// modify / set_preference / add_constraint 的目标路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            target: None,
            value: None,
            parameters: Map::new(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::new(ActionType::Block).with_value(Value::String(reason.into()))
    }

    pub fn allow() -> Self {
        Self::new(ActionType::Allow)
    }

    pub fn modify(target: impl Into<String>, value: Value) -> Self {
        Self::new(ActionType::Modify)
            .with_target(target)
            .with_value(value)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Block,
    Allow,
    Modify,
    Notify,
    Log,
    SetPreference,
    AddConstraint,
}

impl ActionType {
    /// 必须携带 target 的动作
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            ActionType::Modify | ActionType::SetPreference | ActionType::AddConstraint
        )
    }

    /// 会写入上下文字段的动作,notify / log 只产生副作用
    pub fn writes_context(&self) -> bool {
        !matches!(self, ActionType::Notify | ActionType::Log)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Block => "block",
            ActionType::Allow => "allow",
            ActionType::Modify => "modify",
            ActionType::Notify => "notify",
            ActionType::Log => "log",
            ActionType::SetPreference => "set_preference",
            ActionType::AddConstraint => "add_constraint",
        }
    }
}
