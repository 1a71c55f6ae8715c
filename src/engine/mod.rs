pub mod conflict;
pub mod events;
pub mod graph;
pub mod parser;
pub mod rule;
pub mod state;
mod version;

pub use conflict::{ConflictGraph, ConflictReport};
pub use events::{EventBus, EventHandler};
pub use graph::{DependencyGraph, ExecutionPlan};
pub use parser::{parse_rule, rule_to_record, validate_rule, RuleParser, ValidationReport};
pub use rule::{DynRuleEngine, RuleEngine, RuleEngineTrait};
pub use version::*;
