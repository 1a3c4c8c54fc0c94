use serde::{Deserialize, Serialize};

use crate::domain::reservation::ReservationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StepApproved,
    StepRejected,
    CancelRequested,
    WindowElapsed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    /// Steps still pending after the event's own step write.
    pub pending_steps_remaining: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    NotifyNextApprover,
    RecordFullApproval,
    RecordRejection,
    CancelPendingSteps,
    RecordCancellation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}
