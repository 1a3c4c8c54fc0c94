use thiserror::Error;

use crate::domain::reservation::ReservationStatus;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> ReservationStatus;
    fn transition(
        &self,
        current: ReservationStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Reservation lifecycle: `pending` moves once to `approved`, `rejected` or `cancelled`.
#[derive(Clone, Debug, Default)]
pub struct SequentialApprovalFlow;

impl FlowDefinition for SequentialApprovalFlow {
    fn initial_state(&self) -> ReservationStatus {
        ReservationStatus::Pending
    }

    fn transition(
        &self,
        current: ReservationStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_sequential(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ReservationStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: ReservationStatus,
        event: FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<SequentialApprovalFlow> {
    fn default() -> Self {
        Self::new(SequentialApprovalFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: ReservationStatus, event: FlowEvent },
}

fn transition_sequential(
    current: ReservationStatus,
    event: FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        CancelPendingSteps, NotifyNextApprover, RecordCancellation, RecordFullApproval,
        RecordRejection,
    };
    use FlowEvent::{CancelRequested, StepApproved, StepRejected, WindowElapsed};
    use ReservationStatus::{Approved, Cancelled, Pending, Rejected};

    let (to, actions) = match (current, event) {
        (Pending, StepApproved) if context.pending_steps_remaining == 0 => {
            (Approved, vec![RecordFullApproval])
        }
        (Pending, StepApproved) => (Pending, vec![NotifyNextApprover]),
        (Pending, StepRejected) => (Rejected, vec![RecordRejection]),
        (Pending, CancelRequested) | (Pending, WindowElapsed) => {
            (Cancelled, vec![CancelPendingSteps, RecordCancellation])
        }
        _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
