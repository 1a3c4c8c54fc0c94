use thiserror::Error;

use crate::conflict::ConflictList;
use crate::domain::reservation::{ReservationId, ReservationStatus};
use crate::flows::FlowTransitionError;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

/// Failure kinds of the reservation operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReservationError {
    #[error("{0}")]
    Validation(String),
    #[error("requested slots overlap {} existing reservation slot(s)", .0.conflict_count())]
    Conflict(ConflictList),
    #[error("resource has no approval workflow configured")]
    NoWorkflow,
    #[error("approval step not found or no longer pending")]
    NotFoundOrNotPending,
    #[error("{0} not found")]
    NotFound(String),
    #[error("step {step_order} is waiting on earlier steps {blocking_steps:?}")]
    PriorStepsIncomplete { step_order: u32, blocking_steps: Vec<u32> },
    #[error("reservation {reservation_id} expired and was cancelled")]
    Expired { reservation_id: ReservationId },
    #[error("reservation {reservation_id} is already {status}")]
    ReservationAlreadyTerminal { reservation_id: ReservationId, status: ReservationStatus },
    #[error("only the requester may cancel this reservation")]
    NotOwner,
    #[error("reservation is already {status}")]
    AlreadyTerminal { status: ReservationStatus },
    #[error("reservation has already started")]
    AlreadyStarted,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ReservationError {
    /// Stable machine-readable name used in logs and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::NoWorkflow => "no_workflow",
            Self::NotFoundOrNotPending => "not_found_or_not_pending",
            Self::NotFound(_) => "not_found",
            Self::PriorStepsIncomplete { .. } => "prior_steps_incomplete",
            Self::Expired { .. } => "expired",
            Self::ReservationAlreadyTerminal { .. } => "reservation_already_terminal",
            Self::NotOwner => "not_owner",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::AlreadyStarted => "already_started",
            Self::Domain(_) | Self::Storage(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, conflicts: ConflictList, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("gone: {message}")]
    Gone { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The request conflicts with the current state of the reservation."
            }
            Self::NotFound { .. } => "The requested item does not exist or is not available.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::Gone { .. } => "The reservation window has passed and it was cancelled.",
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Conflict { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::Gone { .. } => 410,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Conflict { message, .. }
            | Self::NotFound { message, .. }
            | Self::Forbidden { message, .. }
            | Self::Gone { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Gone { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Gone { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Reservation(error) => match error {
                ReservationError::Validation(message) => Self::BadRequest { message, correlation_id },
                ReservationError::NoWorkflow => {
                    Self::BadRequest { message: error.to_string(), correlation_id }
                }
                ReservationError::Conflict(ref conflicts) => Self::Conflict {
                    message: error.to_string(),
                    conflicts: conflicts.clone(),
                    correlation_id,
                },
                ReservationError::PriorStepsIncomplete { .. }
                | ReservationError::ReservationAlreadyTerminal { .. }
                | ReservationError::AlreadyTerminal { .. }
                | ReservationError::AlreadyStarted => Self::Conflict {
                    message: error.to_string(),
                    conflicts: ConflictList::default(),
                    correlation_id,
                },
                ReservationError::NotFoundOrNotPending | ReservationError::NotFound(_) => {
                    Self::NotFound { message: error.to_string(), correlation_id }
                }
                ReservationError::NotOwner => {
                    Self::Forbidden { message: error.to_string(), correlation_id }
                }
                ReservationError::Expired { .. } => {
                    Self::Gone { message: error.to_string(), correlation_id }
                }
                ReservationError::Domain(_) | ReservationError::Storage(_) => {
                    Self::Internal { message: "storage operation failed".to_owned(), correlation_id }
                }
            },
        }
    }
}
