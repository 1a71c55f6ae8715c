use crate::types::{Resolution, Rule};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 引擎对外发布的事件
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RuleAdded {
        rule: Rule,
    },
    RuleUpdated {
        old_rule: Rule,
        new_rule: Rule,
    },
    RuleDeleted {
        rule_id: String,
    },
    ConflictDetected {
        rule1: String,
        rule2: String,
    },
    ConflictResolved {
        rule1: String,
        rule2: String,
        resolution: Resolution,
    },
    RulesReloaded {
        total_rules: usize,
        active_rules: usize,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::RuleAdded { .. } => EngineEventKind::RuleAdded,
            EngineEvent::RuleUpdated { .. } => EngineEventKind::RuleUpdated,
            EngineEvent::RuleDeleted { .. } => EngineEventKind::RuleDeleted,
            EngineEvent::ConflictDetected { .. } => EngineEventKind::ConflictDetected,
            EngineEvent::ConflictResolved { .. } => EngineEventKind::ConflictResolved,
            EngineEvent::RulesReloaded { .. } => EngineEventKind::RulesReloaded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineEventKind {
    RuleAdded,
    RuleUpdated,
    RuleDeleted,
    ConflictDetected,
    ConflictResolved,
    RulesReloaded,
}

/// 外部规则变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// 规则来源推送的变更通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleChange {
    #[serde(rename = "eventType", alias = "event_type")]
    pub event_type: ChangeType,
    pub record: Value,
}

impl RuleChange {
    pub fn insert(record: Value) -> Self {
        Self {
            event_type: ChangeType::Insert,
            record,
        }
    }

    pub fn update(record: Value) -> Self {
        Self {
            event_type: ChangeType::Update,
            record,
        }
    }

    pub fn delete(rule_id: &str) -> Self {
        Self {
            event_type: ChangeType::Delete,
            record: serde_json::json!({ "id": rule_id }),
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.record.get("id").and_then(Value::as_str)
    }
}
