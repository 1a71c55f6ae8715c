use anyhow::Result;
use biz_rules::cache::MemoryRuleCache;
use biz_rules::source::MemoryRuleSource;
use biz_rules::{EngineConfig, EngineEvent, EngineEventKind, RuleChange, RuleEngine, RuleEngineTrait};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let source = Arc::new(MemoryRuleSource::new(vec![
        json!({
            "id": "understaffed",
            "name": "人手不足时禁止排班",
            "category": "staff-availability",
            "priority": 10,
            "conditions": [{"field": "staffCount", "operator": "less_than", "value": 3}],
            "actions": [{"type": "block", "value": "understaffed"}]
        }),
        json!({
            "id": "night_shift",
            "name": "夜班限制为8小时",
            "category": "shift-patterns",
            "conditions": "[{\"field\": \"shift.type\", \"operator\": \"equals\", \"value\": \"night\"}]",
            "actions": [{"type": "modify", "target": "shift.length", "value": 8}]
        }),
        json!({
            "id": "notify_manager",
            "name": "排班被阻止时通知经理",
            "category": "business-constraints",
            "priority": 1,
            "conditions": [{"field": "rule_result_understaffed", "operator": "equals", "value": true}],
            "actions": [{"type": "notify", "target": "manager", "value": "人手不足"}]
        }),
    ]));

    let engine = RuleEngine::new(EngineConfig::default())
        .with_source(source.clone())
        .with_cache(Arc::new(MemoryRuleCache::new()));

    engine
        .on(
            EngineEventKind::ConflictResolved,
            Arc::new(|event: &EngineEvent| info!("冲突已解决: {:?}", event)),
        )
        .await;

    let status = engine.initialize().await?;
    info!("规则加载成功, 执行顺序: {:?}", status.execution_order);

    let mut context = json!({
        "staffCount": 2,
        "shift": {"type": "night", "length": 12}
    });
    let summary = engine.execute_rules(&mut context).await?;
    info!(
        "执行完成: 成功 {}, 执行 {} 条规则, 上下文: {}",
        summary.success, summary.executed_count, context
    );

    // 来源推送的变更经由同一条变更路径生效
    source
        .publish(RuleChange::update(json!({
            "id": "night_shift",
            "name": "夜班限制为10小时",
            "category": "shift-patterns",
            "conditions": [{"field": "shift.type", "operator": "equals", "value": "night"}],
            "actions": [{"type": "modify", "target": "shift.length", "value": 10}]
        })))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    info!("当前状态: {:?}", engine.get_status().await);
    Ok(())
}
