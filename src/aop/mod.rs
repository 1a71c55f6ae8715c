use crate::types::{ExecutionSummary, RuleContext, RuleError, RuleExecutionResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 规则拦截器,包裹每条规则的执行
#[async_trait]
pub trait RuleInterceptor: Send + Sync + std::fmt::Debug {
    /// 规则执行前,返回错误时该规则记为执行失败
    async fn before<'a>(&self, ctx: &RuleContext<'a>, data: &Value) -> Result<(), RuleError>;

    /// 规则执行后
    async fn after<'a>(
        &self,
        ctx: &RuleContext<'a>,
        result: &RuleExecutionResult,
    ) -> Result<(), RuleError>;

    /// 规则执行出错时
    async fn error<'a>(&self, ctx: &RuleContext<'a>, error: &RuleError) -> Result<(), RuleError>;
}

/// 执行拦截器,包裹整次 `execute_rules`
#[async_trait]
pub trait ExecutionInterceptor: Send + Sync + std::fmt::Debug {
    async fn before_execute(&self, execution_id: Uuid, data: &Value) -> Result<(), RuleError>;

    async fn after_execute(&self, summary: &ExecutionSummary) -> Result<(), RuleError>;
}

/// 拦截器管理器
#[derive(Debug, Default, Clone)]
pub struct InterceptorManager {
    rule_interceptors: Vec<Arc<dyn RuleInterceptor>>,
    execution_interceptors: Vec<Arc<dyn ExecutionInterceptor>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rule_interceptor(&mut self, interceptor: Arc<dyn RuleInterceptor>) {
        self.rule_interceptors.push(interceptor);
    }

    pub fn register_execution_interceptor(&mut self, interceptor: Arc<dyn ExecutionInterceptor>) {
        self.execution_interceptors.push(interceptor);
    }

    pub async fn before_rule<'a>(&self, ctx: &RuleContext<'a>, data: &Value) -> Result<(), RuleError> {
        for interceptor in &self.rule_interceptors {
            interceptor.before(ctx, data).await?;
        }
        Ok(())
    }

    pub async fn after_rule<'a>(
        &self,
        ctx: &RuleContext<'a>,
        result: &RuleExecutionResult,
    ) -> Result<(), RuleError> {
        for interceptor in &self.rule_interceptors {
            interceptor.after(ctx, result).await?;
        }
        Ok(())
    }

    /// 错误拦截器本身失败只记录日志
    pub async fn rule_error<'a>(&self, ctx: &RuleContext<'a>, error: &RuleError) {
        for interceptor in &self.rule_interceptors {
            if let Err(e) = interceptor.error(ctx, error).await {
                warn!(rule_id = %ctx.rule.id, error = %e, "错误拦截器执行失败");
            }
        }
    }

    pub async fn before_execute(&self, execution_id: Uuid, data: &Value) -> Result<(), RuleError> {
        debug!(%execution_id, "执行前置拦截器");
        for interceptor in &self.execution_interceptors {
            interceptor.before_execute(execution_id, data).await?;
        }
        Ok(())
    }

    pub async fn after_execute(&self, summary: &ExecutionSummary) -> Result<(), RuleError> {
        debug!(execution_id = %summary.execution_id, "执行后置拦截器");
        for interceptor in &self.execution_interceptors {
            interceptor.after_execute(summary).await?;
        }
        Ok(())
    }
}

/// 日志拦截器,记录每条规则执行的关键信息
#[derive(Debug)]
pub struct LoggingInterceptor;

#[async_trait]
impl RuleInterceptor for LoggingInterceptor {
    async fn before<'a>(&self, ctx: &RuleContext<'a>, _data: &Value) -> Result<(), RuleError> {
        debug!(
            "开始执行规则 [{}] {}, 顺序: {}, 执行ID: {}",
            ctx.rule.id, ctx.rule.name, ctx.position, ctx.execution_id
        );
        Ok(())
    }

    async fn after<'a>(
        &self,
        ctx: &RuleContext<'a>,
        result: &RuleExecutionResult,
    ) -> Result<(), RuleError> {
        debug!(
            "规则 [{}] 执行结束, 结果: {:?}, 耗时: {:.3}ms",
            ctx.rule.id, result.outcome, result.duration_ms
        );
        Ok(())
    }

    async fn error<'a>(&self, ctx: &RuleContext<'a>, error: &RuleError) -> Result<(), RuleError> {
        info!("规则 [{}] 执行出错: {}", ctx.rule.id, error);
        Ok(())
    }
}
