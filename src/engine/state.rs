use crate::config::EngineConfig;
use crate::engine::conflict::{detect_conflicts, resolve_conflicts, ConflictReport, RulePair};
use crate::engine::graph::{
    build_dependency_graph, build_execution_order, find_cycle, rank_order, DependencyGraph,
};
use crate::types::{
    EngineEvent, EngineStatus, Resolution, ResolutionOutcome, Rule, RuleCategory, RuleError,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// 规则库及其派生索引
///
/// 重建在副本上进行,成功后整体替换,`execute_rules` 不会看到半成品。
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub rules: BTreeMap<String, Rule>,
    pub category_index: BTreeMap<RuleCategory, BTreeSet<String>>,
    pub dependency_graph: DependencyGraph,
    pub conflicts: ConflictReport,
    pub active: BTreeSet<String>,
    pub disabled: BTreeSet<String>,
    pub execution_order: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    pub resolutions: BTreeMap<RulePair, Resolution>,
    pub initialized: bool,
    pub revision: u64,
}

impl EngineState {
    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    pub fn insert(&mut self, rule: Rule) -> Option<Rule> {
        self.rules.insert(rule.id.clone(), rule)
    }

    /// 删除规则,同时删除由它合并生成的规则
    pub fn remove(&mut self, rule_id: &str) -> Option<Rule> {
        let removed = self.rules.remove(rule_id)?;
        let derived: Vec<String> = self
            .rules
            .values()
            .filter(|r| r.metadata.merged_from.iter().any(|id| id == rule_id))
            .map(|r| r.id.clone())
            .collect();
        for id in derived {
            debug!(rule_id = %id, source = rule_id, "删除派生的合并规则");
            self.rules.remove(&id);
        }
        Some(removed)
    }

    /// 按排名排列的某类别规则
    pub fn rules_by_category(&self, category: RuleCategory) -> Vec<Rule> {
        let mut rules: Vec<&Rule> = self
            .category_index
            .get(&category)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rules.get(id))
            .collect();
        rules.sort_by(|a, b| rank_order(a, b));
        rules.into_iter().cloned().collect()
    }

    /// 重建派生状态:类别索引 → 依赖图 → 冲突检测与解决 → 执行顺序
    ///
    /// 合并策略会向规则库加入新规则,因此冲突检测与解决会重复进行,直到规则库不再变化。
    /// 返回本次新产生的冲突事件。
    pub fn rebuild(&mut self, config: &EngineConfig) -> Result<Vec<EngineEvent>, RuleError> {
        let mut events = Vec::new();
        let mut settled = false;

        for pass in 1..=config.max_resolution_passes {
            self.dependency_graph = build_dependency_graph(&self.rules);
            if config.reject_dependency_cycles {
                if let Some(cycle) = find_cycle(&self.dependency_graph) {
                    return Err(RuleError::CircularDependency(cycle.join(" -> ")));
                }
            }

            self.conflicts = detect_conflicts(&self.rules);
            self.active = self
                .rules
                .values()
                .filter(|r| r.is_active)
                .map(|r| r.id.clone())
                .collect();
            self.disabled.clear();

            let resolved = resolve_conflicts(
                &self.rules,
                &self.conflicts,
                &mut self.resolutions,
                &mut self.active,
                &mut self.disabled,
            );

            let conflicts = &self.conflicts;
            self.resolutions.retain(|pair, _| conflicts.kinds.contains_key(pair));

            for resolution in resolved.fresh {
                events.push(EngineEvent::ConflictDetected {
                    rule1: resolution.rule1.clone(),
                    rule2: resolution.rule2.clone(),
                });
                events.push(EngineEvent::ConflictResolved {
                    rule1: resolution.rule1.clone(),
                    rule2: resolution.rule2.clone(),
                    resolution,
                });
            }

            let orphans = self.orphaned_merged_rules();
            let changed = !resolved.merged_rules.is_empty() || !orphans.is_empty();
            for id in orphans {
                debug!(rule_id = %id, "合并记录已失效, 删除合并规则");
                self.rules.remove(&id);
            }
            for rule in resolved.merged_rules {
                info!(rule_id = %rule.id, from = ?rule.metadata.merged_from, "加入合并规则");
                self.insert(rule);
            }

            if !changed {
                debug!(pass, "冲突解决已收敛");
                settled = true;
                break;
            }
        }

        if !settled {
            return Err(RuleError::ConfigError(format!(
                "冲突解决在 {} 轮内未收敛",
                config.max_resolution_passes
            )));
        }

        self.category_index = BTreeMap::new();
        for rule in self.rules.values() {
            self.category_index
                .entry(rule.category)
                .or_default()
                .insert(rule.id.clone());
        }

        let plan = build_execution_order(&self.active, &self.rules, &self.dependency_graph);
        self.execution_order = plan.order;
        self.cycles = plan.cycles;

        debug!(
            total = self.rules.len(),
            active = self.active.len(),
            disabled = self.disabled.len(),
            "规则状态重建完成"
        );
        Ok(events)
    }

    /// 没有任何合并记录指向的合并规则
    fn orphaned_merged_rules(&self) -> Vec<String> {
        let referenced: BTreeSet<&str> = self
            .resolutions
            .values()
            .filter_map(|r| match &r.outcome {
                ResolutionOutcome::Merged { merged_rule_id } => Some(merged_rule_id.as_str()),
                _ => None,
            })
            .collect();
        self.rules
            .values()
            .filter(|r| r.is_merged() && !referenced.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn status(&self, is_updating: bool, deferred_changes: usize) -> EngineStatus {
        EngineStatus {
            initialized: self.initialized,
            revision: self.revision,
            total_rules: self.rules.len(),
            active_rules: self.active.len(),
            disabled_rules: self.disabled.len(),
            inactive_rules: self.rules.values().filter(|r| !r.is_active).count(),
            rules_by_category: self
                .category_index
                .iter()
                .map(|(category, ids)| (category.to_string(), ids.len()))
                .collect(),
            conflict_pairs: self.conflicts.pair_count(),
            resolutions: self.resolutions.len(),
            execution_order: self.execution_order.clone(),
            dependency_cycles: self.cycles.clone(),
            is_updating,
            deferred_changes,
        }
    }
}
