use crate::types::Rule;
use std::collections::HashMap;
use uuid::Uuid;

/// 一次 `execute_rules` 调用的执行上下文,记录已执行规则的成败
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    /// 规则ID -> 是否执行成功,按执行顺序逐步填充
    prior_results: HashMap<String, bool>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            prior_results: HashMap::new(),
        }
    }

    pub fn record(&mut self, rule_id: &str, succeeded: bool) {
        self.prior_results.insert(rule_id.to_string(), succeeded);
    }

    /// 尚未执行或不存在的规则视为失败
    pub fn prior_result(&self, rule_id: &str) -> bool {
        self.prior_results.get(rule_id).copied().unwrap_or(false)
    }

    pub fn prior_results(&self) -> &HashMap<String, bool> {
        &self.prior_results
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 单条规则执行时传给拦截器的上下文
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub rule: &'a Rule,
    pub execution_id: Uuid,
    /// 在执行顺序中的位置
    pub position: usize,
}

impl<'a> RuleContext<'a> {
    pub fn new(rule: &'a Rule, ctx: &ExecutionContext, position: usize) -> Self {
        Self {
            rule,
            execution_id: ctx.execution_id,
            position,
        }
    }
}
