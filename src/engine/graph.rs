use crate::types::Rule;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// 规则ID -> 其依赖的规则ID
pub type DependencyGraph = BTreeMap<String, BTreeSet<String>>;

/// 规则排名:优先级降序,同优先级按ID升序
pub fn rank_order(a: &Rule, b: &Rule) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}

/// 构建依赖图:显式 dependencies 加上条件中 `rule_result_<id>` 的隐式依赖
///
/// 指向不存在规则的依赖会被丢弃
pub fn build_dependency_graph(rules: &BTreeMap<String, Rule>) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for rule in rules.values() {
        let mut edges = BTreeSet::new();
        let explicit = rule.dependencies.iter().map(String::as_str);
        for dependency in explicit.chain(rule.referenced_rule_results()) {
            if rules.contains_key(dependency) {
                edges.insert(dependency.to_string());
            } else {
                debug!(rule_id = %rule.id, dependency, "忽略不存在的依赖");
            }
        }
        graph.insert(rule.id.clone(), edges);
    }

    graph
}

/// 执行顺序及构建过程中发现的循环
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub order: Vec<String>,
    /// 每个循环以路径形式记录,首尾为同一规则
    pub cycles: Vec<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    InProgress,
    Done,
}

struct OrderBuilder<'a> {
    rules: &'a BTreeMap<String, Rule>,
    active: &'a BTreeSet<String>,
    graph: &'a DependencyGraph,
    state: HashMap<&'a str, Visit>,
    stack: Vec<&'a str>,
    plan: ExecutionPlan,
}

impl<'a> OrderBuilder<'a> {
    /// 按排名排列的活跃依赖
    fn active_dependencies(&self, id: &str) -> Vec<&'a Rule> {
        let mut deps: Vec<&'a Rule> = self
            .graph
            .get(id)
            .into_iter()
            .flatten()
            .filter(|dep| self.active.contains(*dep))
            .filter_map(|dep| self.rules.get(dep))
            .collect();
        deps.sort_by(|a, b| rank_order(a, b));
        deps
    }

    fn visit(&mut self, id: &'a str) {
        if self.state.contains_key(id) {
            return;
        }
        self.state.insert(id, Visit::InProgress);
        self.stack.push(id);

        for dep in self.active_dependencies(id) {
            match self.state.get(dep.id.as_str()) {
                Some(Visit::Done) => {}
                Some(Visit::InProgress) => {
                    let mut cycle: Vec<String> = self
                        .stack
                        .iter()
                        .skip_while(|x| **x != dep.id)
                        .map(|x| x.to_string())
                        .collect();
                    cycle.push(dep.id.clone());
                    warn!("检测到循环依赖, 跳过该依赖边: {}", cycle.join(" -> "));
                    self.plan.cycles.push(cycle);
                }
                None => self.visit(dep.id.as_str()),
            }
        }

        self.stack.pop();
        self.state.insert(id, Visit::Done);
        self.plan.order.push(id.to_string());
    }
}

/// 计算执行顺序
///
/// 先按排名确定遍历种子顺序,再做深度优先拓扑排序:依赖先于规则本身输出。
/// 遇到正在访问中的规则说明存在循环,记录后跳过该边,保证每个活跃规则恰好出现一次。
pub fn build_execution_order(
    active: &BTreeSet<String>,
    rules: &BTreeMap<String, Rule>,
    graph: &DependencyGraph,
) -> ExecutionPlan {
    let mut seeds: Vec<&Rule> = active.iter().filter_map(|id| rules.get(id)).collect();
    seeds.sort_by(|a, b| rank_order(a, b));

    let mut builder = OrderBuilder {
        rules,
        active,
        graph,
        state: HashMap::new(),
        stack: Vec::new(),
        plan: ExecutionPlan::default(),
    };
    for rule in seeds {
        builder.visit(rule.id.as_str());
    }

    debug!(order = ?builder.plan.order, "执行顺序已生成");
    builder.plan
}

/// 查找依赖图中的第一个循环,用于拒绝形成循环依赖的规则
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    fn walk<'g>(
        id: &'g str,
        graph: &'g DependencyGraph,
        done: &mut BTreeSet<&'g str>,
        stack: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|x| *x == id) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|x| x.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        if done.contains(id) {
            return None;
        }

        stack.push(id);
        for dep in graph.get(id).into_iter().flatten() {
            if let Some(cycle) = walk(dep, graph, done, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        done.insert(id);
        None
    }

    let mut done = BTreeSet::new();
    let mut stack = Vec::new();
    graph
        .keys()
        .find_map(|id| walk(id, graph, &mut done, &mut stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Operator, RuleCategory};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store(rules: Vec<Rule>) -> BTreeMap<String, Rule> {
        rules.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    fn rule(id: &str, priority: i64) -> Rule {
        Rule::new(id, id, RuleCategory::Custom).with_priority(priority)
    }

    fn all_active(rules: &BTreeMap<String, Rule>) -> BTreeSet<String> {
        rules.keys().cloned().collect()
    }

    #[test]
    fn graph_combines_explicit_and_implicit_edges_and_drops_dangling_ones() {
        let rules = store(vec![
            rule("a", 1),
            rule("b", 1).with_dependency("a").with_dependency("ghost"),
            rule("c", 1).with_condition(Condition::new("rule_result_b", Operator::Equals, json!(true))),
        ]);
        let graph = build_dependency_graph(&rules);
        assert_eq!(graph["a"], BTreeSet::new());
        assert_eq!(graph["b"], BTreeSet::from(["a".to_string()]));
        assert_eq!(graph["c"], BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn priority_seeds_the_order_and_dependencies_come_first() {
        let rules = store(vec![
            rule("low", 1),
            rule("high", 50).with_dependency("low"),
            rule("mid", 20),
            rule("mid2", 20),
        ]);
        let graph = build_dependency_graph(&rules);
        let plan = build_execution_order(&all_active(&rules), &rules, &graph);
        assert_eq!(plan.order, vec!["low", "high", "mid", "mid2"]);
        assert!(plan.cycles.is_empty());
    }

    #[test]
    fn two_cycle_terminates_with_each_rule_once() {
        let rules = store(vec![
            rule("R6", 10).with_dependency("R7"),
            rule("R7", 10).with_dependency("R6"),
        ]);
        let graph = build_dependency_graph(&rules);
        let plan = build_execution_order(&all_active(&rules), &rules, &graph);
        assert_eq!(plan.order, vec!["R7", "R6"]);
        assert_eq!(plan.cycles, vec![vec!["R6", "R7", "R6"]]);
    }

    #[test]
    fn self_dependency_is_a_one_cycle() {
        let rules = store(vec![rule("solo", 1).with_dependency("solo")]);
        let graph = build_dependency_graph(&rules);
        let plan = build_execution_order(&all_active(&rules), &rules, &graph);
        assert_eq!(plan.order, vec!["solo"]);
        assert_eq!(plan.cycles.len(), 1);
    }

    #[test]
    fn inactive_dependencies_are_not_ordered() {
        let rules = store(vec![rule("a", 1).with_dependency("b"), rule("b", 5)]);
        let graph = build_dependency_graph(&rules);
        let active = BTreeSet::from(["a".to_string()]);
        let plan = build_execution_order(&active, &rules, &graph);
        assert_eq!(plan.order, vec!["a"]);
    }

    #[test]
    fn order_is_a_topological_sort_of_acyclic_graphs() {
        let rules = store(vec![
            rule("a", 1),
            rule("b", 9).with_dependency("a"),
            rule("c", 5).with_dependency("b"),
            rule("d", 7).with_dependency("a").with_dependency("c"),
        ]);
        let graph = build_dependency_graph(&rules);
        let plan = build_execution_order(&all_active(&rules), &rules, &graph);
        let position = |id: &str| plan.order.iter().position(|x| x == id).unwrap();
        for (id, deps) in &graph {
            for dep in deps {
                assert!(position(dep) < position(id), "{} must precede {}", dep, id);
            }
        }
        assert_eq!(plan.order.len(), 4);
    }

    #[test]
    fn find_cycle_reports_the_path() {
        let rules = store(vec![
            rule("a", 1).with_dependency("b"),
            rule("b", 1).with_dependency("c"),
            rule("c", 1).with_dependency("a"),
        ]);
        let graph = build_dependency_graph(&rules);
        assert_eq!(find_cycle(&graph), Some(vec!["a".into(), "b".into(), "c".into(), "a".into()]));

        let acyclic = store(vec![rule("a", 1), rule("b", 1).with_dependency("a")]);
        assert_eq!(find_cycle(&build_dependency_graph(&acyclic)), None);
    }
}
