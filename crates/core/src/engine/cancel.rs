use tracing::info;

use crate::activity::ActivityAction;
use crate::clock::Clock;
use crate::domain::slot::earliest_start;
use crate::domain::user::Actor;
use crate::errors::ReservationError;
use crate::flows::FlowEvent;
use crate::notify::Notifier;
use crate::store::ReservationStore;

use super::{CancelReservationRequest, CancelledReservation, Cancellation, ReservationEngine};

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    /// Withdraws a pending reservation on behalf of its requester.
    pub async fn cancel_reservation(
        &self,
        request: CancelReservationRequest,
    ) -> Result<CancelledReservation, ReservationError> {
        let now = self.clock.now_local();
        let comment = request.comment.as_deref().map(str::trim).filter(|text| !text.is_empty());
        let mut tx = self.store.begin().await?;

        let reservation = tx.find_reservation(request.reservation_id).await?.ok_or_else(|| {
            ReservationError::NotFound(format!("reservation {}", request.reservation_id))
        })?;

        if reservation.requester_id != request.requester_id {
            return Err(ReservationError::NotOwner);
        }
        if reservation.status.is_terminal() {
            return Err(ReservationError::AlreadyTerminal { status: reservation.status });
        }

        let slots = tx.slots_for(reservation.id).await?;
        if earliest_start(&slots).is_some_and(|start| start <= now) {
            return Err(ReservationError::AlreadyStarted);
        }

        let cancelled_steps = self
            .cancel_within(
                tx.as_mut(),
                &reservation,
                Cancellation {
                    actor: Actor::User(request.requester_id.clone()),
                    event: FlowEvent::CancelRequested,
                    action: ActivityAction::Cancelled,
                    description: "Reservation cancelled by requester".to_owned(),
                    comment,
                    step_comment: comment,
                    at: now,
                },
            )
            .await?
            .ok_or(ReservationError::AlreadyTerminal { status: reservation.status })?;

        tx.commit().await?;

        info!(
            event_name = "reservation.cancelled",
            reservation_id = reservation.id.0,
            requester_id = %request.requester_id,
            cancelled_steps,
            "reservation cancelled by requester"
        );

        Ok(CancelledReservation { reservation_id: reservation.id, cancelled_steps })
    }
}
