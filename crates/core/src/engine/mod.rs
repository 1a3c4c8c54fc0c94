//! Reservation operations over the storage, notification and clock ports.

mod approve;
mod cancel;
mod create;
mod definitions;
mod queries;
mod sweep;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{ActivityAction, ActivityLogEntry};
use crate::clock::Clock;
use crate::domain::reservation::{ApprovalStepId, Reservation, ReservationId, StepAction};
use crate::domain::resource::ResourceId;
use crate::domain::slot::TimeSlot;
use crate::domain::user::{Actor, UserId};
use crate::errors::{DomainError, ReservationError};
use crate::flows::{FlowContext, FlowEngine, FlowEvent, SequentialApprovalFlow, TransitionOutcome};
use crate::notify::{Notification, Notifier};
use crate::store::{ReservationStore, StoreTransaction};

pub use queries::{AvailabilityReport, DEFAULT_STATS_PERIOD_DAYS};
pub use sweep::SweepReport;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservationRequest {
    pub resource_id: ResourceId,
    pub requester_id: UserId,
    pub purpose: String,
    pub slots: Vec<TimeSlot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedReservation {
    pub reservation_id: ReservationId,
    pub workflow_steps: usize,
    pub daily_slots_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActOnStepRequest {
    pub approval_step_id: ApprovalStepId,
    pub approver_id: UserId,
    pub action: StepAction,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepActed {
    pub reservation_id: ReservationId,
    pub step_order: u32,
    pub fully_approved: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservationRequest {
    pub reservation_id: ReservationId,
    pub requester_id: UserId,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledReservation {
    pub reservation_id: ReservationId,
    pub cancelled_steps: u64,
}

pub struct ReservationEngine<S, N, C> {
    store: S,
    notifier: N,
    clock: C,
    lifecycle: FlowEngine<SequentialApprovalFlow>,
}

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    pub fn new(store: S, notifier: N, clock: C) -> Self {
        Self { store, notifier, clock, lifecycle: FlowEngine::default() }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn transition(
        &self,
        reservation: &Reservation,
        event: FlowEvent,
        pending_steps_remaining: usize,
    ) -> Result<TransitionOutcome, ReservationError> {
        self.lifecycle
            .apply(reservation.status, event, &FlowContext { pending_steps_remaining })
            .map_err(|error| ReservationError::Domain(DomainError::from(error)))
    }

    /// Cancels a pending reservation inside `tx` on behalf of `actor`.
    ///
    /// Returns `None` when the reservation left `pending` before this write landed.
    async fn cancel_within(
        &self,
        tx: &mut dyn StoreTransaction,
        reservation: &Reservation,
        cancellation: Cancellation<'_>,
    ) -> Result<Option<u64>, ReservationError> {
        let outcome = self.transition(reservation, cancellation.event, 0)?;
        if !tx.set_reservation_status(reservation.id, outcome.from, outcome.to).await? {
            return Ok(None);
        }

        let cancelled_steps =
            tx.cancel_pending_steps(reservation.id, cancellation.at, cancellation.step_comment).await?;

        let entry = ActivityLogEntry::new(
            reservation.id,
            cancellation.actor,
            cancellation.action,
            cancellation.description,
            cancellation.at,
        )
        .with_reservation_status(outcome.from, outcome.to)
        .with_comment(cancellation.comment)
        .with_metadata("previous_status", outcome.from.as_str())
        .with_metadata("cancelled_steps", cancelled_steps);
        tx.append_activity(&entry).await?;

        Ok(Some(cancelled_steps))
    }

    /// Resource name for a notification payload, read after commit. A failed lookup only
    /// degrades the payload.
    async fn resource_name(&self, resource_id: ResourceId) -> String {
        match self.store.resource(resource_id).await {
            Ok(Some(resource)) => resource.name,
            Ok(None) => format!("resource {resource_id}"),
            Err(error) => {
                warn!(
                    event_name = "notification.resource_lookup_failed",
                    resource_id = resource_id.0,
                    error = %error,
                    "resource lookup for notification failed"
                );
                format!("resource {resource_id}")
            }
        }
    }

    /// Hands the payload to the notifier. Delivery is never reported back to the caller.
    fn notify(&self, recipient: &UserId, notification: &Notification) {
        let delivered = self.notifier.send_to_user(recipient, notification);
        if delivered {
            info!(
                event_name = "notification.delivered",
                reservation_id = notification.reservation_id().0,
                recipient = %recipient,
                kind = notification.kind(),
                delivered,
                "notification delivered"
            );
        } else {
            debug!(
                event_name = "notification.undelivered",
                reservation_id = notification.reservation_id().0,
                recipient = %recipient,
                kind = notification.kind(),
                delivered,
                "recipient not connected; notification dropped"
            );
        }
    }
}

struct Cancellation<'a> {
    actor: Actor,
    event: FlowEvent,
    action: ActivityAction,
    description: String,
    comment: Option<&'a str>,
    step_comment: Option<&'a str>,
    at: NaiveDateTime,
}
