use crate::components::path::{get_path, string_form};
use crate::types::{
    Condition, ConditionResult, ConditionsOutcome, ExecutionContext, LogicalOperator, Operator,
    Rule, RuleError,
};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

static NULL_VALUE: Value = Value::Null;

/// 对规则的全部条件求值
///
/// 条件串没有括号,按如下方式从左到右折叠:
/// 第一个条件的结果作为初值;第 i 个条件在此前(含自身)出现过 `OR` 时用 OR 合并,
/// 否则用 AND 合并。一旦切换为 OR,后续条件都按 OR 合并。
pub fn evaluate_conditions(rule: &Rule, data: &Value, ctx: &ExecutionContext) -> ConditionsOutcome {
    let mut passed = true;
    let mut use_or = false;
    let mut results = Vec::with_capacity(rule.conditions.len());

    for (i, condition) in rule.conditions.iter().enumerate() {
        let result = evaluate_condition(condition, data, ctx);
        if condition.logical_operator == LogicalOperator::Or {
            use_or = true;
        }
        passed = if i == 0 {
            result.passed
        } else if use_or {
            passed || result.passed
        } else {
            passed && result.passed
        };
        results.push(result);
    }

    debug!(rule_id = %rule.id, passed, "条件求值完成");
    ConditionsOutcome {
        passed,
        conditions: results,
    }
}

/// 对单个条件求值,求值错误只影响本条件(结果为 false)
pub fn evaluate_condition(
    condition: &Condition,
    data: &Value,
    ctx: &ExecutionContext,
) -> ConditionResult {
    let actual = resolve_field(condition, data, ctx);

    let (actual_value, outcome) = match actual {
        Ok(actual) => {
            let outcome = compare(condition, &actual);
            (Some(actual), outcome)
        }
        Err(e) => (None, Err(e)),
    };

    match outcome {
        Ok(matched) => ConditionResult {
            field: condition.field.clone(),
            operator: condition.operator,
            expected_value: condition.value.clone(),
            actual_value,
            passed: matched != condition.negated,
            error: None,
        },
        Err(e) => {
            warn!(field = %condition.field, error = %e, "条件求值失败,按 false 处理");
            ConditionResult {
                field: condition.field.clone(),
                operator: condition.operator,
                expected_value: condition.value.clone(),
                actual_value,
                passed: false,
                error: Some(e.to_string()),
            }
        }
    }
}

/// 解析条件字段:`rule_result_<id>` 取前序规则成败,否则按路径读取上下文
fn resolve_field(
    condition: &Condition,
    data: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, RuleError> {
    if let Some(rule_id) = condition.referenced_rule() {
        return Ok(Value::Bool(ctx.prior_result(rule_id)));
    }
    get_path(data, &condition.field).map_err(|e| RuleError::condition(&condition.field, e))
}

fn compare(condition: &Condition, actual: &Value) -> Result<bool, RuleError> {
    let op = condition.operator;
    let expected = match (&condition.value, op.requires_value()) {
        (Some(value), _) => value,
        (None, false) => &NULL_VALUE,
        (None, true) => {
            return Err(RuleError::condition(&condition.field, "缺少比较值"));
        }
    };

    let matched = match op {
        Operator::Equals => loose_eq(actual, expected),
        Operator::NotEquals => !loose_eq(actual, expected),
        Operator::GreaterThan => numeric(actual, expected, |a, b| a > b),
        Operator::GreaterThanOrEqual => numeric(actual, expected, |a, b| a >= b),
        Operator::LessThan => numeric(actual, expected, |a, b| a < b),
        Operator::LessThanOrEqual => numeric(actual, expected, |a, b| a <= b),
        Operator::Contains => string_form(actual).contains(&string_form(expected)),
        Operator::NotContains => !string_form(actual).contains(&string_form(expected)),
        Operator::In => match expected.as_array() {
            Some(items) => items.iter().any(|item| loose_eq(actual, item)),
            None => false,
        },
        Operator::NotIn => match expected.as_array() {
            Some(items) => !items.iter().any(|item| loose_eq(actual, item)),
            None => false,
        },
        Operator::Regex => {
            let pattern = Regex::new(&string_form(expected))
                .map_err(|e| RuleError::condition(&condition.field, e))?;
            pattern.is_match(&string_form(actual))
        }
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
    };

    Ok(matched)
}

/// 数字按数值比较(1 == 1.0),其余按 JSON 相等
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// 数值强制转换,无法转换时返回 None
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn numeric(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (to_number(actual), to_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleCategory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn check(condition: Condition, data: Value) -> ConditionResult {
        evaluate_condition(&condition, &data, &ExecutionContext::new())
    }

    #[test]
    fn numeric_operators_coerce_strings() {
        let result = check(
            Condition::new("staffCount", Operator::LessThan, json!(3)),
            json!({"staffCount": "2"}),
        );
        assert!(result.passed);
        assert_eq!(result.actual_value, Some(json!("2")));
    }

    #[test]
    fn equals_treats_integer_and_float_alike() {
        assert!(check(Condition::new("x", Operator::Equals, json!(1.0)), json!({"x": 1})).passed);
    }

    #[test]
    fn contains_uses_string_form() {
        let condition = Condition::new("note", Operator::Contains, json!("night"));
        assert!(check(condition.clone(), json!({"note": "overnight shift"})).passed);
        assert!(!check(condition, json!({"note": "day"})).passed);
    }

    #[test]
    fn in_requires_an_array_operand() {
        let data = json!({"role": "nurse"});
        assert!(check(Condition::new("role", Operator::In, json!(["nurse", "doctor"])), data.clone()).passed);
        assert!(!check(Condition::new("role", Operator::In, json!("nurse")), data.clone()).passed);
        assert!(!check(Condition::new("role", Operator::NotIn, json!("nurse")), data.clone()).passed);
        assert!(check(Condition::new("role", Operator::NotIn, json!(["cook"])), data).passed);
    }

    #[test]
    fn regex_matches_and_bad_patterns_fail_the_condition() {
        let data = json!({"code": "EMP-042"});
        assert!(check(Condition::new("code", Operator::Regex, json!("^EMP-\\d+$")), data.clone()).passed);
        let bad = check(Condition::new("code", Operator::Regex, json!("(")), data);
        assert!(!bad.passed);
        assert!(bad.error.is_some());
    }

    #[test]
    fn null_checks_ignore_value() {
        assert!(check(Condition::unary("missing", Operator::IsNull), json!({})).passed);
        assert!(check(Condition::unary("x", Operator::IsNotNull), json!({"x": 0})).passed);
    }

    #[test]
    fn missing_intermediate_key_fails_only_that_condition() {
        let result = check(
            Condition::new("shift.length", Operator::GreaterThan, json!(8)).negate(),
            json!({}),
        );
        assert!(!result.passed);
        assert_eq!(result.actual_value, None);
        assert!(result.error.is_some());
    }

    #[test]
    fn negation_flips_the_result() {
        let result = check(
            Condition::new("x", Operator::Equals, json!(1)).negate(),
            json!({"x": 2}),
        );
        assert!(result.passed);
    }

    #[test]
    fn rule_result_reference_reads_prior_results() {
        let mut ctx = ExecutionContext::new();
        let condition = Condition::new("rule_result_R5", Operator::Equals, json!(true));
        let before = evaluate_condition(&condition, &json!({}), &ctx);
        assert_eq!(before.actual_value, Some(json!(false)));
        assert!(!before.passed);

        ctx.record("R5", true);
        assert!(evaluate_condition(&condition, &json!({}), &ctx).passed);
    }

    #[test]
    fn empty_condition_list_is_true() {
        let rule = Rule::new("r", "r", RuleCategory::Custom);
        assert!(evaluate_conditions(&rule, &json!({}), &ExecutionContext::new()).passed);
    }

    #[test]
    fn or_switch_is_sticky() {
        let data = json!({"a": 1, "b": 2, "c": 3});
        let t = |f: &str, v: i64| Condition::new(f, Operator::Equals, json!(v));

        // (a && b) || c
        let rule = Rule::new("r", "r", RuleCategory::Custom)
            .with_condition(t("a", 0))
            .with_condition(t("b", 2))
            .with_condition(t("c", 3).or());
        assert!(evaluate_conditions(&rule, &data, &ExecutionContext::new()).passed);

        // (a || b) || c, with the switch declared on the first condition
        let rule = Rule::new("r", "r", RuleCategory::Custom)
            .with_condition(t("a", 0).or())
            .with_condition(t("b", 0))
            .with_condition(t("c", 3));
        assert!(evaluate_conditions(&rule, &data, &ExecutionContext::new()).passed);

        // all AND
        let rule = Rule::new("r", "r", RuleCategory::Custom)
            .with_condition(t("a", 1))
            .with_condition(t("b", 0));
        let outcome = evaluate_conditions(&rule, &data, &ExecutionContext::new());
        assert!(!outcome.passed);
        assert_eq!(outcome.conditions.len(), 2);
    }

    #[test]
    fn equals_null_matches_absent_and_null_fields() {
        let condition = Condition::new("manager", Operator::Equals, Value::Null);
        assert!(check(condition.clone(), json!({})).passed);
        assert!(check(condition.clone(), json!({"manager": null})).passed);
        assert!(!check(condition, json!({"manager": "kim"})).passed);
    }

    #[test]
    fn lone_or_condition_folds_to_its_own_result() {
        let data = json!({"a": 1});
        let rule = Rule::new("r", "r", RuleCategory::Custom)
            .with_condition(Condition::new("a", Operator::Equals, json!(0)).or());
        assert!(!evaluate_conditions(&rule, &data, &ExecutionContext::new()).passed);

        let rule = Rule::new("r", "r", RuleCategory::Custom)
            .with_condition(Condition::new("a", Operator::Equals, json!(1)).or());
        assert!(evaluate_conditions(&rule, &data, &ExecutionContext::new()).passed);
    }
}
