pub mod action;
pub mod condition;
pub mod path;

pub use action::{ActionExecutor, ActionNotifier, LogNotifier};
pub use condition::{evaluate_condition, evaluate_conditions};
pub use path::{get_path, set_path, PathError};
