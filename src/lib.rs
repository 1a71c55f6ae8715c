pub mod aop;
pub mod cache;
pub mod components;
pub mod config;
pub mod engine;
pub mod source;
pub mod types;

pub use config::EngineConfig;
pub use engine::{RuleEngine, RuleEngineTrait};
pub use types::*;
