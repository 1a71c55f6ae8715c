use crate::components::path::{set_path, string_form};
use crate::types::{Action, ActionResult, ActionType, Rule, RuleError};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// notify 动作的接收方,由宿主进程实现(邮件、推送等)
#[async_trait]
pub trait ActionNotifier: Send + Sync + std::fmt::Debug {
    async fn notify(&self, rule: &Rule, action: &Action, context: &Value) -> Result<(), RuleError>;
}

/// 默认通知器,仅输出日志
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ActionNotifier for LogNotifier {
    async fn notify(&self, rule: &Rule, action: &Action, _context: &Value) -> Result<(), RuleError> {
        info!(
            rule_id = %rule.id,
            target = ?action.target,
            "规则通知: {}",
            action.value.as_ref().map(string_form).unwrap_or_default()
        );
        Ok(())
    }
}

/// 动作执行器
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    notifiers: Vec<Arc<dyn ActionNotifier>>,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self {
            notifiers: vec![Arc::new(LogNotifier)],
        }
    }
}

impl ActionExecutor {
    pub fn new(notifiers: Vec<Arc<dyn ActionNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn add_notifier(&mut self, notifier: Arc<dyn ActionNotifier>) {
        self.notifiers.push(notifier);
    }

    /// 依次执行规则的全部动作,单个动作失败不影响后续动作
    pub async fn execute_actions(&self, rule: &Rule, context: &mut Value) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(rule.actions.len());
        for action in &rule.actions {
            let result = match self.execute_action(rule, action, context).await {
                Ok(output) => ActionResult {
                    action_type: action.action_type,
                    target: action.target.clone(),
                    success: true,
                    output,
                    error: None,
                },
                Err(e) => {
                    warn!(rule_id = %rule.id, action = action.action_type.as_str(), error = %e, "动作执行失败");
                    ActionResult {
                        action_type: action.action_type,
                        target: action.target.clone(),
                        success: false,
                        output: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        results
    }

    async fn execute_action(
        &self,
        rule: &Rule,
        action: &Action,
        context: &mut Value,
    ) -> Result<Option<Value>, RuleError> {
        let kind = action.action_type.as_str();

        match action.action_type {
            ActionType::Block => {
                let reason = action
                    .value
                    .clone()
                    .or_else(|| action.parameters.get("reason").cloned())
                    .unwrap_or_else(|| Value::String(rule.name.clone()));
                let obj = context_object(context, kind)?;
                obj.insert("blocked".into(), Value::Bool(true));
                obj.insert("blockReason".into(), reason.clone());
                debug!(rule_id = %rule.id, "上下文被阻止: {}", string_form(&reason));
                Ok(Some(json!({ "blocked": true, "blockReason": reason })))
            }
            ActionType::Allow => {
                context_object(context, kind)?.insert("allowed".into(), Value::Bool(true));
                Ok(Some(json!({ "allowed": true })))
            }
            ActionType::Modify => {
                let target = required_target(action)?;
                let value = action.value.clone().unwrap_or(Value::Null);
                set_path(context, target, value.clone()).map_err(|e| RuleError::action(kind, e))?;
                Ok(Some(json!({ "target": target, "value": value })))
            }
            ActionType::Notify => {
                let snapshot: &Value = context;
                let outcomes =
                    join_all(self.notifiers.iter().map(|n| n.notify(rule, action, snapshot))).await;
                let delivered = outcomes.iter().filter(|r| r.is_ok()).count();
                if let Some(Err(e)) = outcomes.into_iter().find(|r| r.is_err()) {
                    return Err(RuleError::action(kind, e));
                }
                Ok(Some(json!({ "delivered": delivered })))
            }
            ActionType::Log => {
                let message = action
                    .value
                    .as_ref()
                    .map(string_form)
                    .unwrap_or_else(|| rule.name.clone());
                let level = action
                    .parameters
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("info");
                match level {
                    "debug" => debug!(rule_id = %rule.id, "{}", message),
                    "warn" => warn!(rule_id = %rule.id, "{}", message),
                    "error" => error!(rule_id = %rule.id, "{}", message),
                    _ => info!(rule_id = %rule.id, "{}", message),
                }
                Ok(None)
            }
            ActionType::SetPreference => {
                let target = required_target(action)?;
                let value = action.value.clone().unwrap_or(Value::Null);
                let preferences = context_object(context, kind)?
                    .entry("preferences")
                    .or_insert_with(|| Value::Object(Map::new()));
                preferences
                    .as_object_mut()
                    .ok_or_else(|| RuleError::action(kind, "preferences 不是对象"))?
                    .insert(target.to_string(), value.clone());
                Ok(Some(json!({ "preference": target, "value": value })))
            }
            ActionType::AddConstraint => {
                let target = required_target(action)?;
                let constraint = json!({
                    "type": target,
                    "value": action.value.clone().unwrap_or(Value::Null),
                    "parameters": Value::Object(action.parameters.clone()),
                });
                let constraints = context_object(context, kind)?
                    .entry("constraints")
                    .or_insert_with(|| Value::Array(Vec::new()));
                constraints
                    .as_array_mut()
                    .ok_or_else(|| RuleError::action(kind, "constraints 不是数组"))?
                    .push(constraint.clone());
                Ok(Some(constraint))
            }
        }
    }
}

fn context_object<'a>(
    context: &'a mut Value,
    kind: &str,
) -> Result<&'a mut Map<String, Value>, RuleError> {
    context
        .as_object_mut()
        .ok_or_else(|| RuleError::action(kind, "执行上下文不是对象"))
}

fn required_target(action: &Action) -> Result<&str, RuleError> {
    action
        .target
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RuleError::action(action.action_type.as_str(), "缺少 target"))
}
