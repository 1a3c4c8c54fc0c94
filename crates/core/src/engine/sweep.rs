use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::activity::{ActivityAction, EXPIRED_STEP_COMMENT, SWEEP_COMMENT};
use crate::clock::Clock;
use crate::domain::reservation::{ReservationId, ReservationStatus};
use crate::domain::user::Actor;
use crate::errors::ReservationError;
use crate::flows::FlowEvent;
use crate::notify::Notifier;
use crate::store::ReservationStore;

use super::{Cancellation, ReservationEngine};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub cancelled_count: u64,
    pub failed_count: u64,
}

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    /// Cancels every pending reservation whose earliest slot started before now.
    ///
    /// Each reservation gets its own transaction. A failure is logged and counted and the sweep
    /// moves on to the next reservation.
    pub async fn sweep_expired(&self) -> Result<SweepReport, ReservationError> {
        let now = self.clock.now_local();
        let candidates = self.store.expired_pending(now).await?;
        let mut report = SweepReport::default();

        for reservation_id in candidates {
            match self.expire_one(reservation_id, now).await {
                Ok(true) => report.cancelled_count += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed_count += 1;
                    error!(
                        event_name = "sweeper.reservation_failed",
                        reservation_id = reservation_id.0,
                        error_kind = err.kind(),
                        error = %err,
                        "failed to auto-cancel expired reservation"
                    );
                }
            }
        }

        info!(
            event_name = "sweeper.run_completed",
            cancelled_count = report.cancelled_count,
            failed_count = report.failed_count,
            "expired reservation sweep finished"
        );

        Ok(report)
    }

    /// Returns `false` when the reservation is no longer pending by the time it is locked.
    async fn expire_one(
        &self,
        reservation_id: ReservationId,
        now: NaiveDateTime,
    ) -> Result<bool, ReservationError> {
        let mut tx = self.store.begin().await?;
        let Some(reservation) = tx.find_reservation(reservation_id).await? else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Pending {
            return Ok(false);
        }

        let cancelled = self
            .cancel_within(
                tx.as_mut(),
                &reservation,
                Cancellation {
                    actor: Actor::System,
                    event: FlowEvent::WindowElapsed,
                    action: ActivityAction::AutoCancelled,
                    description: "Reservation expired while pending".to_owned(),
                    comment: Some(SWEEP_COMMENT),
                    step_comment: Some(EXPIRED_STEP_COMMENT),
                    at: now,
                },
            )
            .await?;

        if cancelled.is_none() {
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}
