pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, SequentialApprovalFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};
