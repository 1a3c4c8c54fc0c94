use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityLogEntry;
use crate::clock::Clock;
use crate::conflict::{candidate_dates, find_conflicts, normalize_candidates, ConflictList};
use crate::domain::reservation::{ReservationDetail, ReservationId};
use crate::domain::resource::ResourceId;
use crate::domain::slot::TimeSlot;
use crate::domain::user::UserId;
use crate::errors::ReservationError;
use crate::notify::Notifier;
use crate::store::ReservationStore;
use crate::views::{
    ApprovalDecision, CalendarEntry, CalendarQuery, DecisionStats, PendingApproval,
    RequesterReservation,
};

use super::ReservationEngine;

pub const DEFAULT_STATS_PERIOD_DAYS: u32 = 30;
const MAX_STATS_PERIOD_DAYS: u32 = 3_660;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub available: bool,
    pub conflicts: ConflictList,
}

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    /// Read-only conflict check for a prospective request. Nothing is written.
    pub async fn check_availability(
        &self,
        resource_id: ResourceId,
        slots: &[TimeSlot],
    ) -> Result<AvailabilityReport, ReservationError> {
        let slots = normalize_candidates(slots).map_err(ReservationError::Validation)?;
        if self.store.resource(resource_id).await?.is_none() {
            return Err(ReservationError::NotFound(format!("resource {resource_id}")));
        }

        let booked = self.store.booked_slots(resource_id, &candidate_dates(&slots)).await?;
        let conflicts = find_conflicts(&slots, &booked);
        Ok(AvailabilityReport { available: conflicts.is_empty(), conflicts })
    }

    pub async fn reservation_detail(
        &self,
        id: ReservationId,
    ) -> Result<ReservationDetail, ReservationError> {
        self.store
            .reservation_detail(id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("reservation {id}")))
    }

    pub async fn calendar(
        &self,
        query: &CalendarQuery,
    ) -> Result<Vec<CalendarEntry>, ReservationError> {
        if query.from > query.to {
            return Err(ReservationError::validation("calendar range ends before it starts"));
        }
        Ok(self.store.calendar(query).await?)
    }

    pub async fn reservations_for_requester(
        &self,
        requester_id: &UserId,
    ) -> Result<Vec<RequesterReservation>, ReservationError> {
        Ok(self.store.reservations_for_requester(requester_id).await?)
    }

    pub async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingApproval>, ReservationError> {
        Ok(self.store.pending_for_approver(approver_id).await?)
    }

    pub async fn decisions_by_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalDecision>, ReservationError> {
        Ok(self.store.decisions_by_approver(approver_id).await?)
    }

    /// Approved/rejected counts over the last `period_days` days, in total and per day.
    pub async fn decision_stats(
        &self,
        approver_id: &UserId,
        period_days: u32,
    ) -> Result<DecisionStats, ReservationError> {
        if !(1..=MAX_STATS_PERIOD_DAYS).contains(&period_days) {
            return Err(ReservationError::validation(format!(
                "period must be between 1 and {MAX_STATS_PERIOD_DAYS} days"
            )));
        }

        let since = self.clock.now_local() - Duration::days(i64::from(period_days));
        let decisions = self.store.decisions_by_approver(approver_id).await?;
        Ok(DecisionStats::from_decisions(approver_id.clone(), period_days, since, &decisions))
    }

    /// Activity entries in append order.
    pub async fn reservation_history(
        &self,
        id: ReservationId,
    ) -> Result<Vec<ActivityLogEntry>, ReservationError> {
        if self.store.reservation_detail(id).await?.is_none() {
            return Err(ReservationError::NotFound(format!("reservation {id}")));
        }
        Ok(self.store.activity_for(id).await?)
    }
}
