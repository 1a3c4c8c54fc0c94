pub mod activity;
pub mod approvals;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod flows;
pub mod notify;
pub mod store;
pub mod views;

pub use activity::{ActivityAction, ActivityLogEntry};
pub use approvals::{ApprovalGate, GateFailure};
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::{BookedSlot, ConflictList, SlotConflict};
pub use domain::reservation::{
    ApprovalStep, ApprovalStepId, NewReservation, Reservation, ReservationDetail, ReservationId,
    ReservationStatus, StepAction, StepStatus,
};
pub use domain::resource::{Resource, ResourceId};
pub use domain::slot::TimeSlot;
pub use domain::user::{Actor, UserId};
pub use domain::workflow::WorkflowStep;
pub use engine::{
    ActOnStepRequest, AvailabilityReport, CancelReservationRequest, CancelledReservation,
    CreateReservationRequest, CreatedReservation, ReservationEngine, StepActed, SweepReport,
    DEFAULT_STATS_PERIOD_DAYS,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, ReservationError};
pub use notify::{NoopNotifier, Notification, Notifier, RecordingNotifier};
pub use store::{ReservationStore, StoreError, StoreTransaction};
pub use views::{
    ApprovalDecision, CalendarEntry, CalendarQuery, DailyDecisionCounts, DecisionCounts,
    DecisionStats, PendingApproval, RequesterReservation,
};
