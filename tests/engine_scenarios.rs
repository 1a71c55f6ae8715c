use biz_rules::engine::{parse_rule, rule_to_record};
use biz_rules::source::MemoryRuleSource;
use biz_rules::{
    Action, Condition, ConflictResolution, EngineConfig, Operator, Rule, RuleCategory, RuleEngine,
    RuleEngineTrait, RuleOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

async fn engine_with(records: Vec<Value>) -> RuleEngine {
    let engine = RuleEngine::new(EngineConfig::default())
        .with_source(Arc::new(MemoryRuleSource::new(records)));
    engine.initialize().await.unwrap();
    engine
}

fn record(id: &str, priority: i64) -> Value {
    json!({"id": id, "name": id, "category": "custom", "priority": priority})
}

#[test_log::test(tokio::test)]
async fn higher_priority_block_wins_over_allow_on_the_same_target() {
    let mut r1 = record("R1", 10);
    r1["actions"] = json!([{"type": "block", "target": "X"}]);
    r1["conflict_resolution"] = json!("priority");
    let mut r2 = record("R2", 5);
    r2["actions"] = json!([{"type": "allow", "target": "X"}]);

    let engine = engine_with(vec![r1, r2]).await;
    let status = engine.get_status().await;
    assert_eq!(status.disabled_rules, 1);
    assert_eq!(engine.get_execution_order().await, vec!["R1"]);

    let mut context = json!({});
    let summary = engine.execute_rules(&mut context).await.unwrap();
    assert_eq!(context["blocked"], json!(true));
    assert!(context.get("allowed").is_none());
    assert_eq!(summary.results.len(), 1);
    assert!(!summary.results.contains_key("R2"));
}

#[test_log::test(tokio::test)]
async fn understaffed_rule_blocks_only_when_its_condition_holds() {
    let mut r3 = record("R3", 10);
    r3["conditions"] = json!([{"field": "staffCount", "operator": "less_than", "value": 3}]);
    r3["actions"] = json!([{"type": "block", "value": "understaffed"}]);
    let engine = engine_with(vec![r3]).await;

    let mut context = json!({"staffCount": 2});
    let summary = engine.execute_rules(&mut context).await.unwrap();
    let result = &summary.results["R3"];
    assert!(result.passed);
    assert_eq!(result.outcome, RuleOutcome::Success);
    assert_eq!(context["blocked"], json!(true));
    assert_eq!(context["blockReason"], json!("understaffed"));

    let mut context = json!({"staffCount": 5});
    let summary = engine.execute_rules(&mut context).await.unwrap();
    assert!(!summary.results["R3"].passed);
    assert_eq!(summary.results["R3"].outcome, RuleOutcome::Skipped);
    assert_eq!(context, json!({"staffCount": 5}));
}

#[test_log::test(tokio::test)]
async fn rule_result_reference_sees_the_failed_dependency() {
    let mut r4 = record("R4", 50);
    r4["conditions"] = json!([{"field": "rule_result_R5", "operator": "equals", "value": true}]);
    r4["actions"] = json!([{"type": "allow"}]);
    let mut r5 = record("R5", 1);
    r5["conditions"] = json!([{"field": "staffCount", "operator": "less_than", "value": 3}]);

    let engine = engine_with(vec![r4, r5]).await;
    assert_eq!(engine.get_execution_order().await, vec!["R5", "R4"]);

    let mut context = json!({"staffCount": 9});
    let summary = engine.execute_rules(&mut context).await.unwrap();
    let r4 = &summary.results["R4"];
    assert_eq!(r4.outcome, RuleOutcome::Skipped);
    assert_eq!(r4.conditions[0].actual_value, Some(json!(false)));
    assert_eq!(r4.conditions[0].expected_value, Some(json!(true)));
    assert!(context.get("allowed").is_none());
}

#[test_log::test(tokio::test)]
async fn two_cycle_runs_each_rule_once() {
    let mut r6 = record("R6", 10);
    r6["dependencies"] = json!(["R7"]);
    let mut r7 = record("R7", 10);
    r7["dependencies"] = json!(["R6"]);

    let engine = engine_with(vec![r6, r7]).await;
    let order = engine.get_execution_order().await;
    assert_eq!(order.len(), 2);
    assert_eq!(order.iter().collect::<BTreeSet<_>>().len(), 2);
    assert_eq!(engine.get_status().await.dependency_cycles.len(), 1);

    let summary = engine.execute_rules(&mut json!({})).await.unwrap();
    assert_eq!(summary.results.len(), 2);
}

#[test_log::test(tokio::test)]
async fn results_match_the_execution_order_exactly() {
    let mut records: Vec<Value> = (0..6).map(|i| record(&format!("r{}", i), i)).collect();
    records[0]["is_active"] = json!(false);
    records[1]["conflicts_with"] = json!(["r2"]);
    records[3]["conditions"] = json!([{"field": "missing.deep", "operator": "equals", "value": 1}]);

    let engine = engine_with(records).await;
    let summary = engine.execute_rules(&mut json!({})).await.unwrap();
    let attempted: Vec<String> = summary.results.keys().cloned().collect();
    let mut order = engine.get_execution_order().await;
    order.sort();
    assert_eq!(attempted, order);
    assert!(!summary.results.contains_key("r0"));
    assert!(!summary.results.contains_key("r1"));
}

#[test_log::test(tokio::test)]
async fn strict_pairs_are_both_disabled() {
    let mut a = record("a", 10);
    a["conflicts_with"] = json!(["b"]);
    a["conflict_resolution"] = json!("strict");
    let engine = engine_with(vec![a, record("b", 1), record("c", 1)]).await;

    assert_eq!(engine.get_execution_order().await, vec!["c"]);
    let status = engine.get_status().await;
    assert_eq!(status.disabled_rules, 2);
    assert_eq!(status.active_rules, 1);
}

#[test_log::test(tokio::test)]
async fn equal_priority_resolution_is_reproducible() {
    let build = || {
        let mut x = record("x", 5);
        x["actions"] = json!([{"type": "modify", "target": "shift.length", "value": 8}]);
        let mut y = record("y", 5);
        y["actions"] = json!([{"type": "modify", "target": "shift.length", "value": 10}]);
        vec![y, x]
    };
    for _ in 0..3 {
        let engine = engine_with(build()).await;
        assert_eq!(engine.get_execution_order().await, vec!["x"]);
    }
}

#[test_log::test(tokio::test)]
async fn repeated_execution_on_the_same_input_is_idempotent() {
    let mut a = record("a", 10);
    a["conditions"] = json!([{"field": "hours", "operator": "greater_than", "value": 40}]);
    a["actions"] = json!([
        {"type": "add_constraint", "target": "maxHours", "value": 40},
        {"type": "set_preference", "target": "overtime", "value": false}
    ]);
    let mut b = record("b", 1);
    b["conditions"] = json!([{"field": "rule_result_a", "operator": "equals", "value": true}]);
    b["actions"] = json!([{"type": "log", "value": "overtime capped"}]);
    let engine = engine_with(vec![a, b]).await;

    let input = json!({"hours": 45});
    let mut first_ctx = input.clone();
    let mut second_ctx = input.clone();
    let first = engine.execute_rules(&mut first_ctx).await.unwrap();
    let second = engine.execute_rules(&mut second_ctx).await.unwrap();

    assert_eq!(first_ctx, second_ctx);
    for (id, result) in &first.results {
        let other = &second.results[id];
        assert_eq!(result.outcome, other.outcome);
        assert_eq!(result.conditions, other.conditions);
        assert_eq!(result.actions, other.actions);
    }
    assert_eq!(engine.get_rule("a").await.unwrap().execution_data.times_executed, 2);
}

#[test]
fn rule_survives_a_record_round_trip() {
    let rule = Rule::new("night", "Night cap", RuleCategory::ShiftPatterns)
        .with_priority(42)
        .with_condition(Condition::new("shift.type", Operator::Equals, json!("night")).or())
        .with_condition(Condition::unary("shift.end", Operator::IsNotNull).negate())
        .with_action(Action::modify("shift.length", json!(8)).with_parameter("unit", json!("h")))
        .with_dependency("base")
        .with_conflict("day")
        .with_resolution(ConflictResolution::Latest);

    let record = rule_to_record(&rule).unwrap();
    assert_eq!(parse_rule(&record).unwrap(), rule);
}

#[test_log::test(tokio::test)]
async fn merge_resolution_executes_the_synthesized_rule() {
    let mut a = record("a", 10);
    a["conflicts_with"] = json!(["b"]);
    a["conflict_resolution"] = json!("merge");
    a["conditions"] = json!([{"field": "day", "operator": "equals", "value": "sat"}]);
    a["actions"] = json!([{"type": "set_preference", "target": "weekend", "value": true}]);
    let mut b = record("b", 3);
    b["conditions"] = json!([{"field": "staffCount", "operator": "greater_than", "value": 1}]);
    b["actions"] = json!([{"type": "add_constraint", "target": "minStaff", "value": 2}]);

    let engine = engine_with(vec![a, b]).await;
    let order = engine.get_execution_order().await;
    assert_eq!(order.len(), 1);
    let merged = engine.get_rule(&order[0]).await.unwrap();
    assert_eq!(merged.metadata.merged_from, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(merged.metadata.tags, vec!["merged".to_string()]);

    let mut context = json!({"day": "sat", "staffCount": 3});
    engine.execute_rules(&mut context).await.unwrap();
    assert_eq!(context["preferences"]["weekend"], json!(true));
    assert_eq!(context["constraints"][0]["type"], json!("minStaff"));

    let mut context = json!({"day": "sun", "staffCount": 3});
    engine.execute_rules(&mut context).await.unwrap();
    assert!(context.get("constraints").is_none());
}

#[test_log::test(tokio::test)]
async fn categories_are_listed_by_rank() {
    let mut records = vec![record("low", 1), record("high", 90), record("mid", 50)];
    records.push(json!({"id": "legal", "name": "legal", "category": "regulatory_compliance"}));
    let engine = engine_with(records).await;

    let ids: Vec<String> = engine
        .get_rules_by_category(RuleCategory::Custom)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["high", "mid", "low"]);
    assert_eq!(engine.get_rules_by_category(RuleCategory::RegulatoryCompliance).await.len(), 1);
    assert!(engine.get_rules_by_category(RuleCategory::PreferenceRules).await.is_empty());
}

#[test_log::test(tokio::test)]
async fn merged_rule_stops_running_once_a_source_is_outranked() {
    let mut a = record("a", 5);
    a["conflicts_with"] = json!(["b"]);
    a["conflict_resolution"] = json!("merge");
    a["actions"] = json!([{"type": "modify", "target": "shift.length", "value": 8}]);
    let mut b = record("b", 1);
    b["actions"] = json!([{"type": "add_constraint", "target": "minStaff", "value": 2}]);
    let engine = engine_with(vec![a, b]).await;
    assert_eq!(engine.get_execution_order().await.len(), 1);

    let mut c = record("c", 10);
    c["conflicts_with"] = json!(["a"]);
    engine.add_rule_record(&c).await.unwrap();
    assert_eq!(engine.get_execution_order().await, vec!["c", "b"]);

    let mut context = json!({});
    engine.execute_rules(&mut context).await.unwrap();
    assert_eq!(
        context,
        json!({"constraints": [{"type": "minStaff", "value": 2, "parameters": {}}]})
    );
}
