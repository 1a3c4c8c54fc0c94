use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{info, warn};

use crate::activity::{ActivityAction, ActivityLogEntry};
use crate::clock::Clock;
use crate::conflict::{candidate_dates, find_conflicts, normalize_candidates};
use crate::domain::reservation::{NewReservation, ReservationStatus};
use crate::domain::slot::{date_envelope, TimeSlot, DATE_FORMAT, TIME_FORMAT};
use crate::domain::user::Actor;
use crate::domain::workflow::ordered;
use crate::errors::ReservationError;
use crate::notify::{Notification, Notifier};
use crate::store::ReservationStore;

use super::{CreateReservationRequest, CreatedReservation, ReservationEngine};

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    /// Creates a pending reservation with one pending step per workflow entry.
    ///
    /// Validation, the conflict check, the workflow lookup and every insert share one
    /// transaction; the step-1 approver is notified only after it commits.
    pub async fn create_reservation(
        &self,
        request: CreateReservationRequest,
    ) -> Result<CreatedReservation, ReservationError> {
        let purpose = request.purpose.trim();
        if purpose.is_empty() {
            return Err(ReservationError::validation("purpose is required"));
        }
        if request.requester_id.as_str().trim().is_empty() {
            return Err(ReservationError::validation("requester is required"));
        }

        let slots = normalize_candidates(&request.slots).map_err(ReservationError::Validation)?;
        let now = self.clock.now_local();
        reject_elapsed(&slots, now)?;
        let (date_from, date_to) = date_envelope(&slots)
            .ok_or_else(|| ReservationError::validation("at least one time slot is required"))?;

        let mut tx = self.store.begin().await?;

        let resource = tx
            .find_resource(request.resource_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("resource {}", request.resource_id)))?;

        let booked = tx.booked_slots(resource.id, &candidate_dates(&slots)).await?;
        let conflicts = find_conflicts(&slots, &booked);
        if !conflicts.is_empty() {
            warn!(
                event_name = "reservation.create.conflict",
                resource_id = resource.id.0,
                requester_id = %request.requester_id,
                conflicting_reservations = ?conflicts.reservation_ids(),
                "requested slots overlap active reservations"
            );
            return Err(ReservationError::Conflict(conflicts));
        }

        let workflow = ordered(tx.workflow(resource.id).await?);
        if workflow.is_empty() {
            warn!(
                event_name = "reservation.create.no_workflow",
                resource_id = resource.id.0,
                "resource has no approval workflow"
            );
            return Err(ReservationError::NoWorkflow);
        }

        let reservation = tx
            .insert_reservation(&NewReservation {
                resource_id: resource.id,
                requester_id: request.requester_id.clone(),
                purpose: purpose.to_owned(),
                date_from,
                date_to,
                created_at: now,
            })
            .await?;
        tx.insert_slots(reservation.id, &slots).await?;
        let steps = tx.insert_steps(reservation.id, &workflow).await?;

        let mut entry = ActivityLogEntry::new(
            reservation.id,
            Actor::User(request.requester_id.clone()),
            ActivityAction::Created,
            format!("Reservation requested for {}", resource.name),
            now,
        )
        .with_metadata("resource_name", resource.name.clone())
        .with_metadata("date_from", date_from.format(DATE_FORMAT).to_string())
        .with_metadata("date_to", date_to.format(DATE_FORMAT).to_string())
        .with_metadata("slots", slots_metadata(&slots))
        .with_metadata("workflow_steps", steps.len());
        entry.new_status = Some(ReservationStatus::Pending.as_str().to_owned());
        tx.append_activity(&entry).await?;

        tx.commit().await?;

        info!(
            event_name = "reservation.created",
            reservation_id = reservation.id.0,
            resource_id = resource.id.0,
            requester_id = %request.requester_id,
            workflow_steps = steps.len(),
            daily_slots = slots.len(),
            "reservation created"
        );

        let total_steps = u32::try_from(steps.len()).unwrap_or(u32::MAX);
        if let Some(first_order) = steps.iter().map(|step| step.step_order).min() {
            for step in steps.iter().filter(|step| step.step_order == first_order) {
                self.notify(
                    &step.approver_id,
                    &Notification::NewReservation {
                        reservation_id: reservation.id,
                        resource_id: resource.id,
                        resource_name: resource.name.clone(),
                        purpose: reservation.purpose.clone(),
                        requester_id: reservation.requester_id.clone(),
                        slots: slots.clone(),
                        step_order: step.step_order,
                        total_steps,
                        timestamp: now,
                    },
                );
            }
        }

        Ok(CreatedReservation {
            reservation_id: reservation.id,
            workflow_steps: steps.len(),
            daily_slots_count: slots.len(),
        })
    }
}

/// Rejects requests that begin before today, or that fall on today with every slot already over.
fn reject_elapsed(slots: &[TimeSlot], now: NaiveDateTime) -> Result<(), ReservationError> {
    let today = now.date();
    let Some(first_date) = slots.iter().map(|slot| slot.date).min() else {
        return Ok(());
    };

    if first_date < today {
        return Err(ReservationError::validation(format!(
            "start date {} is in the past (today is {})",
            first_date.format(DATE_FORMAT),
            today.format(DATE_FORMAT)
        )));
    }

    if first_date == today
        && slots
            .iter()
            .filter(|slot| slot.date == today)
            .all(|slot| slot.end_time <= now.time())
    {
        return Err(ReservationError::validation(format!(
            "every slot for today has already ended (current time {})",
            now.time().format(TIME_FORMAT)
        )));
    }

    Ok(())
}

fn slots_metadata(slots: &[TimeSlot]) -> serde_json::Value {
    slots
        .iter()
        .map(|slot| {
            json!({
                "date": slot.date.format(DATE_FORMAT).to_string(),
                "start_time": slot.start_time.format(TIME_FORMAT).to_string(),
                "end_time": slot.end_time.format(TIME_FORMAT).to_string(),
            })
        })
        .collect()
}
