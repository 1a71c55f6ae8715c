use crate::aop::{ExecutionInterceptor, InterceptorManager, LoggingInterceptor, RuleInterceptor};
use crate::cache::RuleCache;
use crate::components::{evaluate_conditions, ActionExecutor, ActionNotifier};
use crate::config::EngineConfig;
use crate::engine::conflict::ConflictReport;
use crate::engine::events::{EventBus, EventHandler};
use crate::engine::parser::{rule_to_record, validate_rule, RuleParser};
use crate::engine::state::EngineState;
use crate::engine::VersionManager;
use crate::source::RuleSource;
use crate::types::{
    ChangeType, EngineEvent, EngineEventKind, EngineStatus, ExecutionContext, ExecutionSummary,
    Resolution, Rule, RuleCategory, RuleChange, RuleContext, RuleError, RuleExecutionResult,
    RuleOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type DynRuleEngine = Arc<dyn RuleEngineTrait + Send + Sync>;

#[async_trait]
pub trait RuleEngineTrait: Debug + Send + Sync {
    /// 从缓存或规则来源加载规则并完成首次重建
    async fn initialize(&self) -> Result<EngineStatus, RuleError>;
    async fn add_rule(&self, rule: Rule) -> Result<Rule, RuleError>;
    async fn add_rule_record(&self, record: &Value) -> Result<Rule, RuleError>;
    /// 以 JSON 对象部分更新规则,id 与 created_at 不可修改
    async fn update_rule(&self, rule_id: &str, patch: Value) -> Result<Rule, RuleError>;
    async fn delete_rule(&self, rule_id: &str) -> Result<Rule, RuleError>;
    /// 按执行顺序执行全部启用的规则,动作直接修改传入的上下文
    async fn execute_rules(&self, context: &mut Value) -> Result<ExecutionSummary, RuleError>;
    async fn get_rules_by_category(&self, category: RuleCategory) -> Vec<Rule>;
    async fn get_rule(&self, rule_id: &str) -> Option<Rule>;
    async fn get_status(&self) -> EngineStatus;
    async fn get_execution_order(&self) -> Vec<String>;
    async fn get_conflicts(&self) -> ConflictReport;
    async fn get_resolutions(&self) -> Vec<Resolution>;
    async fn on(&self, kind: EngineEventKind, handler: EventHandler);
    /// 应用外部推送的变更,重建进行中时排队
    async fn apply_change(&self, change: RuleChange) -> Result<(), RuleError>;
    async fn add_rule_interceptor(&self, interceptor: Arc<dyn RuleInterceptor>);
    async fn add_execution_interceptor(&self, interceptor: Arc<dyn ExecutionInterceptor>);
    async fn add_notifier(&self, notifier: Arc<dyn ActionNotifier>);
}

/// 结构性变更
#[derive(Debug)]
enum Mutation {
    Add(Rule),
    Update { rule_id: String, patch: Value },
    Upsert(Rule),
    Delete(String),
    /// None 表示保留当前规则库,只做重建
    Reload(Option<Vec<Rule>>),
}

/// 重建互斥标记与延迟变更队列
#[derive(Debug, Default)]
struct UpdateGuard {
    updating: bool,
    draining: bool,
    deferred: VecDeque<RuleChange>,
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: Arc<EngineConfig>,
    parser: RuleParser,
    state: Arc<RwLock<EngineState>>,
    guard: Arc<Mutex<UpdateGuard>>,
    commit_lock: Arc<Mutex<()>>,
    version_manager: Arc<VersionManager>,
    interceptor_manager: Arc<RwLock<InterceptorManager>>,
    executor: Arc<RwLock<ActionExecutor>>,
    events: EventBus,
    source: Option<Arc<dyn RuleSource>>,
    cache: Option<Arc<dyn RuleCache>>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut interceptor_manager = InterceptorManager::new();
        // 注册日志拦截器
        interceptor_manager.register_rule_interceptor(Arc::new(LoggingInterceptor));

        Self {
            parser: RuleParser::new(config.default_priority, config.default_conflict_resolution),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(EngineState::default())),
            guard: Arc::new(Mutex::new(UpdateGuard::default())),
            commit_lock: Arc::new(Mutex::new(())),
            version_manager: Arc::new(VersionManager::new()),
            interceptor_manager: Arc::new(RwLock::new(interceptor_manager)),
            executor: Arc::new(RwLock::new(ActionExecutor::default())),
            events: EventBus::new(),
            source: None,
            cache: None,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RuleSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn RuleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 在后台任务中消费变更通道,通道关闭后任务结束
    pub fn spawn_change_listener(&self, mut rx: mpsc::UnboundedReceiver<RuleChange>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if let Err(e) = engine.apply_change(change).await {
                    warn!(error = %e, "实时规则变更应用失败");
                }
            }
            debug!("规则变更通道已关闭");
        })
    }

    async fn load_records(&self) -> Result<Option<Vec<Value>>, RuleError> {
        let key = self.config.cache_key.as_str();
        if let Some(cache) = &self.cache {
            match cache.get(key).await {
                Ok(Some(Value::Array(records))) => {
                    info!(count = records.len(), "从缓存加载规则");
                    return Ok(Some(records));
                }
                Ok(Some(_)) => warn!(key, "缓存内容不是规则数组, 忽略"),
                Ok(None) => debug!(key, "规则缓存未命中"),
                Err(e) => warn!(error = %e, "读取规则缓存失败"),
            }
        }

        let Some(source) = &self.source else {
            return Ok(None);
        };
        let records = source.load_rules().await?;
        info!(count = records.len(), "从规则来源加载规则");

        if let Some(cache) = &self.cache {
            let ttl = Duration::from_secs(self.config.cache_ttl_secs);
            if let Err(e) = cache.set(key, &Value::Array(records.clone()), ttl).await {
                warn!(error = %e, "写入规则缓存失败");
            }
        }
        Ok(Some(records))
    }

    /// 批量校验:依赖只需在同一批次中存在
    fn validate_batch(&self, rules: Vec<Rule>) -> Vec<Rule> {
        let mut seen = BTreeSet::new();
        let mut unique = Vec::with_capacity(rules.len());
        for rule in rules {
            if seen.insert(rule.id.clone()) {
                unique.push(rule);
            } else {
                warn!(rule_id = %rule.id, "跳过重复的规则ID");
            }
        }

        unique
            .into_iter()
            .filter(|rule| {
                match validate_rule(rule, |id| seen.contains(id)).into_result(&rule.id) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "跳过未通过校验的规则");
                        false
                    }
                }
            })
            .collect()
    }

    fn patched_rule(&self, old: &Rule, patch: &Value) -> Result<Rule, RuleError> {
        let Value::Object(patch) = patch else {
            return Err(RuleError::Validation {
                rule_id: old.id.clone(),
                errors: vec!["更新内容必须是 JSON 对象".to_string()],
            });
        };

        let mut record = rule_to_record(old)?;
        if let Value::Object(fields) = &mut record {
            for (key, value) in patch {
                match key.as_str() {
                    "id" if value.as_str() != Some(old.id.as_str()) => {
                        warn!(rule_id = %old.id, "规则ID不可修改, 忽略");
                    }
                    "id" | "created_at" => {}
                    _ => {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let mut rule = self.parser.parse(&record)?;
        rule.metadata.version = old.metadata.version + 1;
        rule.metadata.created_at = old.metadata.created_at;
        rule.metadata.updated_at = Utc::now();
        rule.execution_data = old.execution_data.clone();
        Ok(rule)
    }

    fn validate_against(state: &EngineState, rule: &Rule) -> Result<(), RuleError> {
        validate_rule(rule, |id| id == rule.id || state.contains(id)).into_result(&rule.id)
    }

    /// 在状态副本上应用变更
    fn apply_mutation(
        &self,
        state: &mut EngineState,
        mutation: Mutation,
    ) -> Result<(Option<Rule>, Vec<EngineEvent>), RuleError> {
        match mutation {
            Mutation::Add(rule) => {
                if state.contains(&rule.id) {
                    return Err(RuleError::DuplicateRule(rule.id));
                }
                Self::validate_against(state, &rule)?;
                state.insert(rule.clone());
                Ok((Some(rule.clone()), vec![EngineEvent::RuleAdded { rule }]))
            }
            Mutation::Update { rule_id, patch } => {
                let old = state
                    .rules
                    .get(&rule_id)
                    .cloned()
                    .ok_or_else(|| RuleError::RuleNotFound(rule_id.clone()))?;
                let new_rule = self.patched_rule(&old, &patch)?;
                Self::validate_against(state, &new_rule)?;
                state.insert(new_rule.clone());
                Ok((
                    Some(new_rule.clone()),
                    vec![EngineEvent::RuleUpdated { old_rule: old, new_rule }],
                ))
            }
            Mutation::Upsert(mut rule) => {
                Self::validate_against(state, &rule)?;
                match state.rules.get(&rule.id).cloned() {
                    Some(old) => {
                        rule.metadata.version = rule.metadata.version.max(old.metadata.version + 1);
                        rule.execution_data = old.execution_data.clone();
                        state.insert(rule.clone());
                        Ok((
                            Some(rule.clone()),
                            vec![EngineEvent::RuleUpdated { old_rule: old, new_rule: rule }],
                        ))
                    }
                    None => {
                        state.insert(rule.clone());
                        Ok((Some(rule.clone()), vec![EngineEvent::RuleAdded { rule }]))
                    }
                }
            }
            Mutation::Delete(rule_id) => {
                let removed = state
                    .remove(&rule_id)
                    .ok_or_else(|| RuleError::RuleNotFound(rule_id.clone()))?;
                Ok((Some(removed), vec![EngineEvent::RuleDeleted { rule_id }]))
            }
            Mutation::Reload(rules) => {
                if let Some(rules) = rules {
                    state.rules = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
                    state.resolutions.clear();
                }
                state.initialized = true;
                Ok((None, Vec::new()))
            }
        }
    }

    /// 串行地完成一次变更:副本上应用并重建,成功后整体替换
    async fn commit(&self, mutation: Mutation) -> Result<Option<Rule>, RuleError> {
        let _serial = self.commit_lock.lock().await;
        self.guard.lock().await.updating = true;

        let reload = matches!(mutation, Mutation::Reload(_));
        let outcome = self.rebuild_with(mutation).await;

        self.guard.lock().await.updating = false;
        drop(_serial);

        let (rule, mut events) = outcome?;
        if reload {
            let state = self.state.read().await;
            events.push(EngineEvent::RulesReloaded {
                total_rules: state.rules.len(),
                active_rules: state.active.len(),
            });
        } else {
            self.invalidate_cache().await;
        }
        self.events.emit_all(&events).await;
        Ok(rule)
    }

    async fn rebuild_with(
        &self,
        mutation: Mutation,
    ) -> Result<(Option<Rule>, Vec<EngineEvent>), RuleError> {
        let mut next = self.state.read().await.clone();
        let (rule, mut events) = self.apply_mutation(&mut next, mutation)?;
        events.extend(next.rebuild(&self.config)?);

        let mut state = self.state.write().await;
        // 重建期间产生的执行统计
        for (id, rule) in next.rules.iter_mut() {
            if let Some(live) = state.rules.get(id) {
                rule.execution_data = live.execution_data.clone();
            }
        }
        next.revision = self.version_manager.create_version().version;
        info!(
            revision = next.revision,
            total = next.rules.len(),
            active = next.active.len(),
            "规则状态已更新"
        );
        *state = next;
        Ok((rule, events))
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&self.config.cache_key).await {
                warn!(error = %e, "清除规则缓存失败");
            }
        }
    }

    fn change_to_mutation(&self, change: RuleChange) -> Result<Mutation, RuleError> {
        match change.event_type {
            ChangeType::Delete => change
                .rule_id()
                .map(|id| Mutation::Delete(id.to_string()))
                .ok_or_else(|| RuleError::parse("<unknown>", "删除事件缺少 id")),
            ChangeType::Insert | ChangeType::Update => {
                Ok(Mutation::Upsert(self.parser.parse(&change.record)?))
            }
        }
    }

    /// 依次应用排队的变更,同一时刻只有一个任务在处理队列
    async fn drain_deferred(&self) {
        {
            let mut guard = self.guard.lock().await;
            if guard.draining || guard.updating || guard.deferred.is_empty() {
                return;
            }
            guard.draining = true;
        }
        self.drain_queue().await;
    }

    async fn drain_queue(&self) {
        loop {
            let change = {
                let mut guard = self.guard.lock().await;
                match guard.deferred.pop_front() {
                    Some(change) => change,
                    None => {
                        guard.draining = false;
                        return;
                    }
                }
            };
            debug!(rule_id = ?change.rule_id(), "应用排队的规则变更");
            let result = match self.change_to_mutation(change) {
                Ok(mutation) => self.commit(mutation).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "排队的规则变更应用失败");
            }
        }
    }

    /// 单条规则的一次执行:拦截器、条件求值、动作执行
    async fn run_rule(
        &self,
        rule: &Rule,
        rule_ctx: &RuleContext<'_>,
        interceptors: &InterceptorManager,
        executor: &ActionExecutor,
        context: &mut Value,
        exec_ctx: &ExecutionContext,
    ) -> Result<RuleExecutionResult, RuleError> {
        interceptors.before_rule(rule_ctx, context).await?;

        let conditions = evaluate_conditions(rule, context, exec_ctx);
        let (outcome, actions) = if conditions.passed {
            (RuleOutcome::Success, executor.execute_actions(rule, context).await)
        } else {
            (RuleOutcome::Skipped, Vec::new())
        };

        Ok(RuleExecutionResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            outcome,
            passed: conditions.passed,
            conditions: conditions.conditions,
            actions,
            error: None,
            duration_ms: 0.0,
        })
    }

    async fn record_statistics(&self, summary: &ExecutionSummary) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        for (rule_id, result) in &summary.results {
            if let Some(rule) = state.rules.get_mut(rule_id) {
                rule.execution_data
                    .record(result.duration_ms, result.outcome != RuleOutcome::Error, now);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

#[async_trait]
impl RuleEngineTrait for RuleEngine {
    async fn initialize(&self) -> Result<EngineStatus, RuleError> {
        let rules = match self.load_records().await? {
            Some(records) => {
                let (rules, errors) = self.parser.parse_batch(&records);
                if !errors.is_empty() {
                    warn!(skipped = errors.len(), "部分规则记录解析失败");
                }
                Some(self.validate_batch(rules))
            }
            None => None,
        };

        self.commit(Mutation::Reload(rules)).await?;

        if let Some(source) = &self.source {
            let mut listener = self.listener.lock().await;
            if listener.is_none() {
                if let Some(rx) = source.subscribe().await {
                    *listener = Some(self.spawn_change_listener(rx));
                    info!("已订阅规则实时变更");
                }
            }
        }

        self.drain_deferred().await;
        Ok(self.get_status().await)
    }

    async fn add_rule(&self, rule: Rule) -> Result<Rule, RuleError> {
        let result = self.commit(Mutation::Add(rule)).await;
        self.drain_deferred().await;
        result?.ok_or_else(|| RuleError::Json("变更未返回规则".to_string()))
    }

    async fn add_rule_record(&self, record: &Value) -> Result<Rule, RuleError> {
        let rule = self.parser.parse(record)?;
        self.add_rule(rule).await
    }

    async fn update_rule(&self, rule_id: &str, patch: Value) -> Result<Rule, RuleError> {
        let result = self
            .commit(Mutation::Update {
                rule_id: rule_id.to_string(),
                patch,
            })
            .await;
        self.drain_deferred().await;
        result?.ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<Rule, RuleError> {
        let result = self.commit(Mutation::Delete(rule_id.to_string())).await;
        self.drain_deferred().await;
        result?.ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }

    async fn execute_rules(&self, context: &mut Value) -> Result<ExecutionSummary, RuleError> {
        if !context.is_object() {
            return Err(RuleError::InvalidContext);
        }

        let interceptors = self.interceptor_manager.read().await.clone();
        let executor = self.executor.read().await.clone();
        let mut exec_ctx = ExecutionContext::new();
        let execution_id = exec_ctx.execution_id;

        interceptors.before_execute(execution_id, context).await?;

        // 快照后释放读锁,拦截器与通知器中可以再调用引擎的变更接口
        let (plan, execution_order) = {
            let state = self.state.read().await;
            let plan: Vec<Rule> = state
                .execution_order
                .iter()
                .filter_map(|id| state.rules.get(id).cloned())
                .collect();
            (plan, state.execution_order.clone())
        };
        let mut results = BTreeMap::new();

        for (position, rule) in plan.iter().enumerate() {
            let rule_ctx = RuleContext::new(rule, &exec_ctx, position);
            let started = Instant::now();

            let step = AssertUnwindSafe(self.run_rule(
                rule,
                &rule_ctx,
                &interceptors,
                &executor,
                context,
                &exec_ctx,
            ))
            .catch_unwind()
            .await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let failure = match step {
                Ok(Ok(mut result)) => {
                    result.duration_ms = duration_ms;
                    match interceptors.after_rule(&rule_ctx, &result).await {
                        Ok(()) => Ok(result),
                        Err(e) => Err(e),
                    }
                }
                Ok(Err(e)) => Err(e),
                Err(payload) => Err(RuleError::execution(&rule.id, panic_message(payload.as_ref()))),
            };

            let result = match failure {
                Ok(result) => result,
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "规则执行失败");
                    interceptors.rule_error(&rule_ctx, &e).await;
                    RuleExecutionResult::failed(&rule.id, &rule.name, e.to_string(), duration_ms)
                }
            };

            exec_ctx.record(&rule.id, result.succeeded());
            results.insert(rule.id.clone(), result);
        }

        let summary = ExecutionSummary {
            execution_id,
            success: results.values().all(|r| r.outcome != RuleOutcome::Error),
            executed_count: results.values().filter(|r| r.succeeded()).count(),
            results,
            execution_order,
        };
        info!(
            %execution_id,
            executed = summary.executed_count,
            attempted = summary.results.len(),
            success = summary.success,
            "规则执行完成"
        );

        self.record_statistics(&summary).await;
        interceptors.after_execute(&summary).await?;
        Ok(summary)
    }

    async fn get_rules_by_category(&self, category: RuleCategory) -> Vec<Rule> {
        self.state.read().await.rules_by_category(category)
    }

    async fn get_rule(&self, rule_id: &str) -> Option<Rule> {
        self.state.read().await.rules.get(rule_id).cloned()
    }

    async fn get_status(&self) -> EngineStatus {
        let (updating, deferred) = {
            let guard = self.guard.lock().await;
            (guard.updating, guard.deferred.len())
        };
        self.state.read().await.status(updating, deferred)
    }

    async fn get_execution_order(&self) -> Vec<String> {
        self.state.read().await.execution_order.clone()
    }

    async fn get_conflicts(&self) -> ConflictReport {
        self.state.read().await.conflicts.clone()
    }

    async fn get_resolutions(&self) -> Vec<Resolution> {
        self.state.read().await.resolutions.values().cloned().collect()
    }

    async fn on(&self, kind: EngineEventKind, handler: EventHandler) {
        self.events.on(kind, handler).await;
    }

    async fn apply_change(&self, change: RuleChange) -> Result<(), RuleError> {
        {
            let mut guard = self.guard.lock().await;
            if guard.updating || guard.draining || !guard.deferred.is_empty() {
                debug!(rule_id = ?change.rule_id(), "重建进行中, 变更已排队");
                guard.deferred.push_back(change);
                return Ok(());
            }
            guard.draining = true;
        }

        let result = match self.change_to_mutation(change) {
            Ok(mutation) => self.commit(mutation).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.drain_queue().await;
        result
    }

    async fn add_rule_interceptor(&self, interceptor: Arc<dyn RuleInterceptor>) {
        self.interceptor_manager
            .write()
            .await
            .register_rule_interceptor(interceptor);
    }

    async fn add_execution_interceptor(&self, interceptor: Arc<dyn ExecutionInterceptor>) {
        self.interceptor_manager
            .write()
            .await
            .register_execution_interceptor(interceptor);
    }

    async fn add_notifier(&self, notifier: Arc<dyn ActionNotifier>) {
        self.executor.write().await.add_notifier(notifier);
    }
}
