use crate::components::condition::{loose_eq, to_number};
use crate::engine::graph::rank_order;
use crate::types::{
    Action, ActionType, Condition, ConflictKind, ConflictResolution, LogicalOperator, Operator,
    Resolution, ResolutionOutcome, Rule, RuleMetadata,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// 规则ID -> 与之冲突的规则ID(对称)
pub type ConflictGraph = BTreeMap<String, BTreeSet<String>>;

/// 无序规则对,较小的ID在前
pub type RulePair = (String, String);

pub fn pair_key(a: &str, b: &str) -> RulePair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// 冲突检测结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictReport {
    pub graph: ConflictGraph,
    pub kinds: BTreeMap<RulePair, BTreeSet<ConflictKind>>,
}

impl ConflictReport {
    pub fn pair_count(&self) -> usize {
        self.kinds.len()
    }

    pub fn conflicts_of(&self, rule_id: &str) -> Option<&BTreeSet<String>> {
        self.graph.get(rule_id)
    }

    fn add(&mut self, a: &str, b: &str, kind: ConflictKind) {
        self.graph.entry(a.to_string()).or_default().insert(b.to_string());
        self.graph.entry(b.to_string()).or_default().insert(a.to_string());
        self.kinds.entry(pair_key(a, b)).or_default().insert(kind);
    }
}

/// 检测所有启用规则之间的显式与隐式冲突,每次全量重新计算
pub fn detect_conflicts(rules: &BTreeMap<String, Rule>) -> ConflictReport {
    let active: Vec<&Rule> = rules.values().filter(|r| r.is_active).collect();
    let mut report = ConflictReport::default();

    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            // 合并规则与其来源规则之间不算冲突
            if a.metadata.merged_from.contains(&b.id) || b.metadata.merged_from.contains(&a.id) {
                continue;
            }
            if a.conflicts_with.contains(&b.id) || b.conflicts_with.contains(&a.id) {
                report.add(&a.id, &b.id, ConflictKind::Explicit);
            }
            if actions_conflict(a, b) {
                report.add(&a.id, &b.id, ConflictKind::Action);
            }
            if conditions_contradict(a, b) {
                report.add(&a.id, &b.id, ConflictKind::Condition);
            }
        }
    }

    debug!(pairs = report.pair_count(), "冲突检测完成");
    report
}

/// 同一目标上一方 block 一方 allow,或双方 modify 为不同的值
fn actions_conflict(a: &Rule, b: &Rule) -> bool {
    a.actions.iter().any(|x| {
        b.actions.iter().any(|y| {
            if x.target != y.target {
                return false;
            }
            match (x.action_type, y.action_type) {
                (ActionType::Block, ActionType::Allow) | (ActionType::Allow, ActionType::Block) => {
                    true
                }
                (ActionType::Modify, ActionType::Modify) => !values_eq(&x.value, &y.value),
                _ => false,
            }
        })
    })
}

fn values_eq(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => loose_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// 区间的一端:值与是否为严格不等
struct Bound {
    value: f64,
    strict: bool,
}

/// 取反后的等值操作符,其余操作符取反后不参与矛盾判断
fn effective_operator(condition: &Condition) -> Option<Operator> {
    match (condition.operator, condition.negated) {
        (op, false) => Some(op),
        (Operator::Equals, true) => Some(Operator::NotEquals),
        (Operator::NotEquals, true) => Some(Operator::Equals),
        _ => None,
    }
}

fn lower_bound(op: Operator, value: &Option<Value>) -> Option<Bound> {
    let strict = match op {
        Operator::GreaterThan => true,
        Operator::GreaterThanOrEqual => false,
        _ => return None,
    };
    value.as_ref().and_then(to_number).map(|value| Bound { value, strict })
}

fn upper_bound(op: Operator, value: &Option<Value>) -> Option<Bound> {
    let strict = match op {
        Operator::LessThan => true,
        Operator::LessThanOrEqual => false,
        _ => return None,
    };
    value.as_ref().and_then(to_number).map(|value| Bound { value, strict })
}

fn empty_range(lower: &Bound, upper: &Bound) -> bool {
    lower.value > upper.value || (lower.value == upper.value && (lower.strict || upper.strict))
}

fn pair_contradicts(x: &Condition, y: &Condition) -> bool {
    let (Some(op_x), Some(op_y)) = (effective_operator(x), effective_operator(y)) else {
        return false;
    };

    match (op_x, op_y) {
        (Operator::Equals, Operator::NotEquals) | (Operator::NotEquals, Operator::Equals) => {
            values_eq(&x.value, &y.value)
        }
        _ => {
            if let (Some(lo), Some(up)) = (lower_bound(op_x, &x.value), upper_bound(op_y, &y.value)) {
                return empty_range(&lo, &up);
            }
            if let (Some(lo), Some(up)) = (lower_bound(op_y, &y.value), upper_bound(op_x, &x.value)) {
                return empty_range(&lo, &up);
            }
            false
        }
    }
}

/// 同一字段上的条件不可能同时成立
fn conditions_contradict(a: &Rule, b: &Rule) -> bool {
    a.conditions.iter().any(|x| {
        b.conditions
            .iter()
            .filter(|y| y.field == x.field)
            .any(|y| pair_contradicts(x, y))
    })
}

/// 一轮冲突解决的结果
#[derive(Debug, Clone, Default)]
pub struct ResolutionPass {
    /// 本轮合并生成、需要加入规则库的新规则
    pub merged_rules: Vec<Rule>,
    /// 本轮新做出的解决记录(不含重放的旧记录)
    pub fresh: Vec<Resolution>,
}

/// 按排名依次解决冲突对,修改 active / disabled 集合
///
/// 每个规则对只处理一次,采用排名较高一方的策略;任一方已被禁用的规则对跳过,
/// 并丢弃该对的旧记录。已有记录且双方版本未变时直接重放记录。
pub fn resolve_conflicts(
    rules: &BTreeMap<String, Rule>,
    report: &ConflictReport,
    records: &mut BTreeMap<RulePair, Resolution>,
    active: &mut BTreeSet<String>,
    disabled: &mut BTreeSet<String>,
) -> ResolutionPass {
    let mut ranked: Vec<&Rule> = report
        .graph
        .keys()
        .filter_map(|id| rules.get(id))
        .collect();
    ranked.sort_by(|a, b| rank_order(a, b));

    let mut pass = ResolutionPass::default();
    let mut handled: BTreeSet<RulePair> = BTreeSet::new();

    for rule in ranked {
        let Some(conflicts) = report.conflicts_of(&rule.id) else {
            continue;
        };
        for other_id in conflicts {
            let key = pair_key(&rule.id, other_id);
            if !handled.insert(key.clone()) {
                continue;
            }
            let Some(other) = rules.get(other_id) else {
                continue;
            };
            if disabled.contains(&rule.id) || disabled.contains(&other.id) {
                // 旧记录不再生效,其合并规则随之成为孤儿
                if records.remove(&key).is_some() {
                    debug!(rule1 = %rule.id, rule2 = %other.id, "冲突一方已被禁用, 丢弃旧解决记录");
                } else {
                    debug!(rule1 = %rule.id, rule2 = %other.id, "冲突一方已被禁用, 跳过");
                }
                continue;
            }

            let versions = (rule.metadata.version, other.metadata.version);
            if let Some(record) = records.get(&key) {
                if record.rule1 == rule.id
                    && record.rule_versions == versions
                    && merged_rule_present(record, rules)
                {
                    apply(record, active, disabled);
                    continue;
                }
            }

            let (resolution, merged) = resolve_pair(rule, other);
            apply(&resolution, active, disabled);
            if let Some(merged) = merged {
                pass.merged_rules.push(merged);
            }
            records.insert(key, resolution.clone());
            pass.fresh.push(resolution);
        }
    }

    pass
}

fn merged_rule_present(record: &Resolution, rules: &BTreeMap<String, Rule>) -> bool {
    match &record.outcome {
        ResolutionOutcome::Merged { merged_rule_id } => rules.contains_key(merged_rule_id),
        _ => true,
    }
}

fn apply(resolution: &Resolution, active: &mut BTreeSet<String>, disabled: &mut BTreeSet<String>) {
    for id in resolution.disabled_rules() {
        if active.remove(id) {
            disabled.insert(id.to_string());
        }
    }
}

/// 解决一对冲突,`high` 的排名高于 `low`
pub fn resolve_pair(high: &Rule, low: &Rule) -> (Resolution, Option<Rule>) {
    let strategy = high.conflict_resolution;
    let mut fallback = false;
    let mut merged = None;

    let outcome = match strategy {
        ConflictResolution::Priority => winner(high, low),
        ConflictResolution::Latest => {
            if low.metadata.updated_at > high.metadata.updated_at {
                winner(low, high)
            } else {
                winner(high, low)
            }
        }
        ConflictResolution::Strict => ResolutionOutcome::BothDisabled,
        ConflictResolution::Merge => match merge_rules(high, low) {
            Some(rule) => {
                let outcome = ResolutionOutcome::Merged {
                    merged_rule_id: rule.id.clone(),
                };
                merged = Some(rule);
                outcome
            }
            None => {
                info!(rule1 = %high.id, rule2 = %low.id, "规则动作无法合并, 回退到优先级策略");
                fallback = true;
                winner(high, low)
            }
        },
        ConflictResolution::UserDefined => {
            info!(rule1 = %high.id, rule2 = %low.id, "冲突交由调用方处理");
            ResolutionOutcome::Unresolved
        }
    };

    info!(rule1 = %high.id, rule2 = %low.id, ?strategy, ?outcome, "冲突已解决");
    let resolution = Resolution {
        rule1: high.id.clone(),
        rule2: low.id.clone(),
        strategy,
        outcome,
        fallback,
        rule_versions: (high.metadata.version, low.metadata.version),
        resolved_at: Utc::now(),
    };
    (resolution, merged)
}

fn winner(winner: &Rule, loser: &Rule) -> ResolutionOutcome {
    ResolutionOutcome::Winner {
        winner: winner.id.clone(),
        loser: loser.id.clone(),
    }
}

/// 合并规则的确定性ID
pub fn merged_rule_id(a: &str, b: &str) -> String {
    let (lo, hi) = pair_key(a, b);
    let hash = blake3::hash(format!("{}|{}", lo, hi).as_bytes());
    format!("merged_{}", &hash.to_hex()[..16])
}

/// 两个动作写同一目标但类型或值不同
fn actions_clash(x: &Action, y: &Action) -> bool {
    x.action_type.writes_context()
        && y.action_type.writes_context()
        && x.target == y.target
        && (x.action_type != y.action_type || !values_eq(&x.value, &y.value))
}

/// 合并两条规则:条件取并集(全部 AND),动作取并集;动作互相冲突时返回 None
pub fn merge_rules(high: &Rule, low: &Rule) -> Option<Rule> {
    let mut actions: Vec<Action> = high.actions.clone();
    for action in &low.actions {
        if !actions.contains(action) {
            actions.push(action.clone());
        }
    }
    for (i, x) in actions.iter().enumerate() {
        if actions[i + 1..].iter().any(|y| actions_clash(x, y)) {
            return None;
        }
    }

    let mut conditions: Vec<Condition> = Vec::new();
    for condition in high.conditions.iter().chain(&low.conditions) {
        let mut condition = condition.clone();
        condition.logical_operator = LogicalOperator::And;
        if !conditions.contains(&condition) {
            conditions.push(condition);
        }
    }

    let sources = [high.id.as_str(), low.id.as_str()];
    let outside = |ids: &BTreeSet<String>| -> BTreeSet<String> {
        ids.iter()
            .filter(|id| !sources.contains(&id.as_str()))
            .cloned()
            .collect()
    };

    let mut rule = Rule::new(
        merged_rule_id(&high.id, &low.id),
        format!("{} + {}", high.name, low.name),
        high.category,
    );
    rule.description = format!("由 {} 与 {} 合并生成", high.id, low.id);
    rule.priority = high.priority.max(low.priority);
    rule.conditions = conditions;
    rule.actions = actions;
    rule.dependencies = outside(&high.dependencies.union(&low.dependencies).cloned().collect());
    rule.conflicts_with = outside(&high.conflicts_with.union(&low.conflicts_with).cloned().collect());
    rule.conflict_resolution = ConflictResolution::Priority;
    rule.metadata = RuleMetadata {
        tags: vec!["merged".to_string()],
        merged_from: vec![high.id.clone(), low.id.clone()],
        ..RuleMetadata::default()
    };
    Some(rule)
}
