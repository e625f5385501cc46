//! Asset lifecycle: states, transition machine and severity

pub mod machine;
pub mod severity;
pub mod state;

pub use machine::{BatchSummary, Conditions, StateMachine, Transition, TransitionEvent, Trigger};
pub use severity::{annotate, Severity, SeverityContext};
pub use state::LifecycleState;
