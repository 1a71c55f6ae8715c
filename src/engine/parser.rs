use crate::types::{ConflictResolution, Rule, RuleError, DEFAULT_PRIORITY};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

lazy_static! {
    /// 规则记录的结构约束,conditions / actions 允许数组、单个对象或 JSON 文本
    static ref RULE_RECORD_SCHEMA: Value = json!({
        "type": "object",
        "required": ["id", "name", "category"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string", "minLength": 1 },
            "description": { "type": ["string", "null"] },
            "category": { "type": "string" },
            "priority": { "type": ["integer", "null"] },
            "is_active": { "type": ["boolean", "null"] },
            "conditions": { "type": ["array", "object", "string", "null"] },
            "actions": { "type": ["array", "object", "string", "null"] },
            "dependencies": { "type": ["array", "null"], "items": { "type": "string" } },
            "conflicts_with": { "type": ["array", "null"], "items": { "type": "string" } },
            "conflict_resolution": { "type": ["string", "null"] },
            "created_at": { "type": ["string", "integer", "null"] },
            "updated_at": { "type": ["string", "integer", "null"] },
            "created_by": { "type": ["string", "null"] },
            "version": { "type": ["integer", "null"], "minimum": 1 },
            "tags": { "type": ["array", "null"], "items": { "type": "string" } }
        }
    });
    static ref RULE_RECORD_VALIDATOR: jsonschema::Validator =
        jsonschema::validator_for(&RULE_RECORD_SCHEMA).expect("规则记录 schema 无效");
}

/// 规则记录解析器
#[derive(Debug, Clone)]
pub struct RuleParser {
    pub default_priority: i64,
    pub default_resolution: ConflictResolution,
}

impl Default for RuleParser {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            default_resolution: ConflictResolution::Priority,
        }
    }
}

impl RuleParser {
    pub fn new(default_priority: i64, default_resolution: ConflictResolution) -> Self {
        Self {
            default_priority,
            default_resolution,
        }
    }

    /// 将原始规则记录解析为 Rule
    pub fn parse(&self, raw: &Value) -> Result<Rule, RuleError> {
        let rule_id = raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();

        let errors: Vec<String> = RULE_RECORD_VALIDATOR
            .iter_errors(raw)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(RuleError::parse(rule_id, errors.join("; ")));
        }

        let mut record = match raw {
            Value::Object(obj) => obj.clone(),
            _ => return Err(RuleError::parse(rule_id, "规则记录必须是对象")),
        };

        // 显式的 null 与缺省等价
        record.retain(|_, v| !v.is_null());

        normalize_list(&mut record, "conditions", &rule_id)?;
        normalize_list(&mut record, "actions", &rule_id)?;
        normalize_timestamp(&mut record, "created_at", &rule_id)?;
        normalize_timestamp(&mut record, "updated_at", &rule_id)?;

        record
            .entry("priority")
            .or_insert_with(|| json!(self.default_priority));
        if !record.contains_key("conflict_resolution") {
            record.insert(
                "conflict_resolution".into(),
                serde_json::to_value(self.default_resolution)?,
            );
        }

        serde_json::from_value(Value::Object(record)).map_err(|e| RuleError::parse(rule_id, e))
    }

    /// 批量解析,单条失败只记录日志并跳过
    pub fn parse_batch(&self, records: &[Value]) -> (Vec<Rule>, Vec<RuleError>) {
        let mut rules = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for raw in records {
            match self.parse(raw) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!(error = %e, "跳过无法解析的规则记录");
                    errors.push(e);
                }
            }
        }
        (rules, errors)
    }
}

/// 使用默认值解析单条规则记录
pub fn parse_rule(raw: &Value) -> Result<Rule, RuleError> {
    RuleParser::default().parse(raw)
}

/// 规则的记录形态,`parse_rule(&rule_to_record(&rule)?)` 还原同一条规则
pub fn rule_to_record(rule: &Rule) -> Result<Value, RuleError> {
    Ok(serde_json::to_value(rule)?)
}

fn normalize_list(
    record: &mut Map<String, Value>,
    key: &str,
    rule_id: &str,
) -> Result<(), RuleError> {
    let value = match record.remove(key) {
        None => Value::Array(Vec::new()),
        Some(Value::String(text)) => serde_json::from_str(&text)
            .map_err(|e| RuleError::parse(rule_id, format!("{} 不是合法的 JSON: {}", key, e)))?,
        Some(value) => value,
    };

    let list = match value {
        Value::Array(_) => value,
        Value::Object(_) => Value::Array(vec![value]),
        Value::Null => Value::Array(Vec::new()),
        other => {
            return Err(RuleError::parse(
                rule_id,
                format!("{} 必须是数组或对象, 实际为 {}", key, other),
            ))
        }
    };
    record.insert(key.to_string(), list);
    Ok(())
}

/// 毫秒时间戳转换为 RFC 3339 文本
fn normalize_timestamp(
    record: &mut Map<String, Value>,
    key: &str,
    rule_id: &str,
) -> Result<(), RuleError> {
    if let Some(millis) = record.get(key).and_then(Value::as_i64) {
        let at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| RuleError::parse(rule_id, format!("{} 超出范围", key)))?;
        record.insert(key.to_string(), Value::String(at.to_rfc3339()));
    }
    Ok(())
}

/// 规则校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn into_result(self, rule_id: &str) -> Result<(), RuleError> {
        if self.valid {
            Ok(())
        } else {
            Err(RuleError::Validation {
                rule_id: rule_id.to_string(),
                errors: self.errors,
            })
        }
    }
}

/// 结构校验,`rule_exists` 用于检查依赖的规则是否已存在
pub fn validate_rule(rule: &Rule, rule_exists: impl Fn(&str) -> bool) -> ValidationReport {
    let mut errors = Vec::new();

    if rule.id.trim().is_empty() {
        errors.push("id 不能为空".to_string());
    }
    if rule.name.trim().is_empty() {
        errors.push("name 不能为空".to_string());
    }

    for (i, condition) in rule.conditions.iter().enumerate() {
        if condition.field.trim().is_empty() {
            errors.push(format!("conditions[{}] 缺少 field", i));
        }
        if condition.operator.requires_value() && condition.value.is_none() {
            errors.push(format!("conditions[{}] 缺少 value", i));
        }
    }

    for (i, action) in rule.actions.iter().enumerate() {
        let has_target = action.target.as_deref().is_some_and(|t| !t.is_empty());
        if action.action_type.requires_target() && !has_target {
            errors.push(format!(
                "actions[{}] ({}) 缺少 target",
                i,
                action.action_type.as_str()
            ));
        }
    }

    for dependency in &rule.dependencies {
        if !rule_exists(dependency) {
            errors.push(format!("依赖的规则不存在: {}", dependency));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ActionType, Condition, LogicalOperator, Operator, RuleCategory};
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn parses_a_minimal_record_with_defaults() {
        let rule = assert_ok!(parse_rule(&json!({
            "id": "R1",
            "name": "Minimum staff",
            "category": "staff-availability"
        })));
        assert_eq!(rule.priority, DEFAULT_PRIORITY);
        assert!(rule.is_active);
        assert!(rule.conditions.is_empty());
        assert_eq!(rule.conflict_resolution, ConflictResolution::Priority);
        assert_eq!(rule.metadata.version, 1);
    }

    #[test]
    fn single_objects_and_json_text_are_normalized() {
        let rule = assert_ok!(parse_rule(&json!({
            "id": "R2",
            "name": "Night cap",
            "category": "shift-patterns",
            "conditions": {"field": "hours", "operator": "greater_than", "value": 10, "logicalOperator": "OR"},
            "actions": "[{\"type\": \"block\", \"value\": \"too long\"}]"
        })));
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(rule.conditions[0].operator, Operator::GreaterThan);
        assert_eq!(rule.conditions[0].logical_operator, LogicalOperator::Or);
        assert_eq!(rule.actions, vec![Action::block("too long")]);
    }

    #[test]
    fn missing_required_fields_are_parse_errors() {
        let err = assert_err!(parse_rule(&json!({"id": "R3", "category": "custom"})));
        assert!(matches!(err, RuleError::Parse { ref rule_id, .. } if rule_id == "R3"));
    }

    #[test]
    fn unknown_operator_or_category_is_rejected() {
        assert_err!(parse_rule(&json!({
            "id": "R4", "name": "x", "category": "custom",
            "conditions": [{"field": "a", "operator": "approximately", "value": 1}]
        })));
        assert_err!(parse_rule(&json!({"id": "R4", "name": "x", "category": "weather"})));
    }

    #[test]
    fn malformed_json_text_is_a_parse_error() {
        assert_err!(parse_rule(&json!({
            "id": "R5", "name": "x", "category": "custom", "actions": "[{"
        })));
    }

    #[test]
    fn millisecond_timestamps_are_accepted() {
        let rule = assert_ok!(parse_rule(&json!({
            "id": "R6", "name": "x", "category": "custom",
            "created_at": 1_700_000_000_000_i64,
            "updated_at": "2024-03-01T10:00:00Z"
        })));
        assert_eq!(rule.metadata.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(rule.metadata.updated_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn batch_parsing_skips_bad_records() {
        let (rules, errors) = RuleParser::default().parse_batch(&[
            json!({"id": "ok", "name": "ok", "category": "custom"}),
            json!({"id": "bad"}),
            json!("not a record"),
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn record_round_trip_preserves_the_rule() {
        let rule = Rule::new("R7", "Weekend preference", RuleCategory::PreferenceRules)
            .with_priority(42)
            .with_condition(Condition::new("day", Operator::In, json!(["sat", "sun"])).or())
            .with_condition(Condition::unary("manager", Operator::IsNotNull).negate())
            .with_action(
                Action::new(ActionType::SetPreference)
                    .with_target("weekend")
                    .with_value(json!(true))
                    .with_parameter("weight", json!(0.5)),
            )
            .with_dependency("R1")
            .with_conflict("R8")
            .with_resolution(ConflictResolution::Merge);

        let record = assert_ok!(rule_to_record(&rule));
        assert_eq!(record["is_active"], json!(true));
        assert_eq!(assert_ok!(parse_rule(&record)), rule);
    }

    #[test]
    fn validation_reports_every_defect() {
        let rule = Rule::new("R9", " ", RuleCategory::Custom)
            .with_condition(Condition::unary("", Operator::Equals))
            .with_action(Action::new(ActionType::Modify))
            .with_dependency("missing");
        let report = validate_rule(&rule, |_| false);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 5);
        assert!(report.into_result("R9").is_err());
    }

    #[test]
    fn null_checks_do_not_need_a_value() {
        let rule = Rule::new("R10", "x", RuleCategory::Custom)
            .with_condition(Condition::unary("a", Operator::IsNull))
            .with_dependency("R1");
        assert!(validate_rule(&rule, |id| id == "R1").valid);
    }

    #[test]
    fn explicit_null_is_a_comparison_value() {
        let record = json!({
            "id": "R11",
            "name": "No manager",
            "category": "custom",
            "conditions": [{"field": "manager", "operator": "equals", "value": null}],
            "actions": [{"type": "modify", "target": "shift.manager", "value": null}]
        });
        let rule = assert_ok!(parse_rule(&record));
        assert_eq!(rule.conditions[0].value, Some(Value::Null));
        assert_eq!(rule.actions[0].value, Some(Value::Null));
        assert!(validate_rule(&rule, |_| false).valid);

        let missing = assert_ok!(parse_rule(&json!({
            "id": "R12",
            "name": "x",
            "category": "custom",
            "conditions": [{"field": "manager", "operator": "equals"}]
        })));
        assert_eq!(missing.conditions[0].value, None);
        assert_err!(validate_rule(&missing, |_| false).into_result("R12"));
    }

    #[test]
    fn null_comparison_survives_a_round_trip() {
        let rule = Rule::new("R13", "x", RuleCategory::Custom)
            .with_condition(Condition::new("manager", Operator::Equals, Value::Null));
        let record = assert_ok!(rule_to_record(&rule));
        assert_eq!(record["conditions"][0]["value"], Value::Null);
        assert_eq!(assert_ok!(parse_rule(&record)), rule);
    }
}
