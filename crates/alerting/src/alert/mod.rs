mod evaluator;
mod event;
mod fingerprint;
mod rule;
mod scheduler;
mod state;
mod store;

pub use evaluator::{EvaluationResult, Evaluator};
pub use event::{AlertEvent, AlertEventKind};
pub use fingerprint::Fingerprint;
pub use rule::{render_template, AlertRule, Condition, Expr, Severity};
pub use scheduler::{evaluate_once, EvaluationContext, RuleRunner};
pub use state::{step, AlertInstance, AlertState, Step, TickContext, TransitionKind};
pub use store::{AlertStore, ApplyOutcome, StateError};
