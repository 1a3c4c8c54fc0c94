use tracing::{info, warn};

use crate::activity::{ActivityAction, ActivityLogEntry, EXPIRED_STEP_COMMENT};
use crate::approvals::{ApprovalGate, GateFailure};
use crate::clock::Clock;
use crate::domain::reservation::{StepAction, StepStatus};
use crate::domain::slot::earliest_start;
use crate::domain::user::Actor;
use crate::errors::ReservationError;
use crate::flows::{FlowAction, FlowEvent};
use crate::notify::{Notification, Notifier};
use crate::store::ReservationStore;

use super::{ActOnStepRequest, Cancellation, ReservationEngine, StepActed};

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    /// Records an approver's decision on their step.
    ///
    /// Checks run in this order: step ownership, step still pending, parent terminality, expiry,
    /// sequential gating. A step that was already decided or cancelled answers
    /// `NotFoundOrNotPending` whatever state its reservation is in. An expired reservation is
    /// cancelled and committed before `Expired` is returned; every other failure rolls the
    /// transaction back.
    pub async fn act_on_step(
        &self,
        request: ActOnStepRequest,
    ) -> Result<StepActed, ReservationError> {
        let now = self.clock.now_local();
        let comment = request.comment.as_deref().map(str::trim).filter(|text| !text.is_empty());
        let mut tx = self.store.begin().await?;

        let step = match tx.find_step(request.approval_step_id).await? {
            Some(step) if step.approver_id == request.approver_id => step,
            _ => return Err(ReservationError::NotFoundOrNotPending),
        };

        let reservation = tx.find_reservation(step.reservation_id).await?.ok_or_else(|| {
            ReservationError::NotFound(format!("reservation {}", step.reservation_id))
        })?;

        if step.status != StepStatus::Pending {
            return Err(ReservationError::NotFoundOrNotPending);
        }
        if reservation.status.is_terminal() {
            return Err(ReservationError::ReservationAlreadyTerminal {
                reservation_id: reservation.id,
                status: reservation.status,
            });
        }

        let slots = tx.slots_for(reservation.id).await?;
        if earliest_start(&slots).is_some_and(|start| start < now) {
            let cancelled = self
                .cancel_within(
                    tx.as_mut(),
                    &reservation,
                    Cancellation {
                        actor: Actor::System,
                        event: FlowEvent::WindowElapsed,
                        action: ActivityAction::AutoCancelled,
                        description: "Reservation auto-cancelled: window passed before approval"
                            .to_owned(),
                        comment: Some(EXPIRED_STEP_COMMENT),
                        step_comment: Some(EXPIRED_STEP_COMMENT),
                        at: now,
                    },
                )
                .await?;
            tx.commit().await?;

            warn!(
                event_name = "approval.expired",
                reservation_id = reservation.id.0,
                approval_step_id = step.id.0,
                approver_id = %request.approver_id,
                cancelled_steps = cancelled.unwrap_or_default(),
                "reservation window elapsed; auto-cancelled instead of applying decision"
            );
            return Err(ReservationError::Expired { reservation_id: reservation.id });
        }

        let steps = tx.steps_for(reservation.id).await?;
        let gate = ApprovalGate::new(&steps);
        if let Err(GateFailure::PriorStepsIncomplete { step_order, blocking_steps }) =
            gate.evaluate(step.step_order)
        {
            return Err(ReservationError::PriorStepsIncomplete { step_order, blocking_steps });
        }

        let new_status = request.action.step_status();
        let decided =
            tx.decide_step(step.id, &request.approver_id, new_status, now, comment).await?;
        if !decided {
            return Err(ReservationError::NotFoundOrNotPending);
        }

        let (step_action, verb) = match request.action {
            StepAction::Approved => (ActivityAction::StepApproved, "approved"),
            StepAction::Rejected => (ActivityAction::StepRejected, "rejected"),
        };
        tx.append_activity(
            &ActivityLogEntry::new(
                reservation.id,
                Actor::User(request.approver_id.clone()),
                step_action,
                format!("Step {} {verb} by {}", step.step_order, request.approver_id),
                now,
            )
            .with_step_status(step.step_order, StepStatus::Pending, new_status)
            .with_comment(comment),
        )
        .await?;

        let event = match request.action {
            StepAction::Approved => FlowEvent::StepApproved,
            StepAction::Rejected => FlowEvent::StepRejected,
        };
        let pending_steps_remaining = gate.pending_count().saturating_sub(1);
        let outcome = self.transition(&reservation, event, pending_steps_remaining)?;

        if outcome.changes_status() {
            if !tx.set_reservation_status(reservation.id, outcome.from, outcome.to).await? {
                return Err(ReservationError::NotFoundOrNotPending);
            }

            let (action, description) = if outcome.actions.contains(&FlowAction::RecordFullApproval)
            {
                (ActivityAction::FullyApproved, "Reservation fully approved".to_owned())
            } else {
                (
                    ActivityAction::Rejected,
                    format!("Reservation rejected at step {}", step.step_order),
                )
            };
            tx.append_activity(
                &ActivityLogEntry::new(
                    reservation.id,
                    Actor::User(request.approver_id.clone()),
                    action,
                    description,
                    now,
                )
                .with_reservation_status(outcome.from, outcome.to)
                .with_comment(comment),
            )
            .await?;
        }

        tx.commit().await?;

        let fully_approved = outcome.actions.contains(&FlowAction::RecordFullApproval);
        info!(
            event_name = "approval.step_decided",
            reservation_id = reservation.id.0,
            approval_step_id = step.id.0,
            step_order = step.step_order,
            approver_id = %request.approver_id,
            decision = new_status.as_str(),
            reservation_status = outcome.to.as_str(),
            "approval step decided"
        );

        if outcome.actions.contains(&FlowAction::NotifyNextApprover) {
            let resource_name = self.resource_name(reservation.resource_id).await;
            let total_steps = u32::try_from(steps.len()).unwrap_or(u32::MAX);
            for approver in gate.next_approvers(step.step_order) {
                self.notify(
                    approver,
                    &Notification::ReservationReadyForApproval {
                        reservation_id: reservation.id,
                        resource_id: reservation.resource_id,
                        resource_name: resource_name.clone(),
                        purpose: reservation.purpose.clone(),
                        requester_id: reservation.requester_id.clone(),
                        step_order: step.step_order + 1,
                        total_steps,
                        previous_approver_id: request.approver_id.clone(),
                        timestamp: now,
                    },
                );
            }
        }

        Ok(StepActed { reservation_id: reservation.id, step_order: step.step_order, fully_approved })
    }
}
