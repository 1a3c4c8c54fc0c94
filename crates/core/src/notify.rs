use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::reservation::ReservationId;
use crate::domain::resource::ResourceId;
use crate::domain::slot::TimeSlot;
use crate::domain::user::UserId;

/// Payload pushed to an approver. Serialises with a `type` tag such as `NEW_RESERVATION`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    NewReservation {
        reservation_id: ReservationId,
        resource_id: ResourceId,
        resource_name: String,
        purpose: String,
        requester_id: UserId,
        slots: Vec<TimeSlot>,
        step_order: u32,
        total_steps: u32,
        timestamp: NaiveDateTime,
    },
    ReservationReadyForApproval {
        reservation_id: ReservationId,
        resource_id: ResourceId,
        resource_name: String,
        purpose: String,
        requester_id: UserId,
        step_order: u32,
        total_steps: u32,
        previous_approver_id: UserId,
        timestamp: NaiveDateTime,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewReservation { .. } => "NEW_RESERVATION",
            Self::ReservationReadyForApproval { .. } => "RESERVATION_READY_FOR_APPROVAL",
        }
    }

    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Self::NewReservation { reservation_id, .. }
            | Self::ReservationReadyForApproval { reservation_id, .. } => *reservation_id,
        }
    }
}

/// Best-effort push to one user. Returns whether the payload was handed to a live receiver;
/// implementations must not block and must not fail the caller.
pub trait Notifier: Send + Sync {
    fn send_to_user(&self, user: &UserId, notification: &Notification) -> bool;
}

impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    fn send_to_user(&self, user: &UserId, notification: &Notification) -> bool {
        (**self).send_to_user(user, notification)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn send_to_user(&self, _user: &UserId, _notification: &Notification) -> bool {
        false
    }
}

/// Keeps every payload it is asked to send.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(UserId, Notification)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(UserId, Notification)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_to(&self, user: &UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(recipient, _)| recipient == user)
            .map(|(_, notification)| notification)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send_to_user(&self, user: &UserId, notification: &Notification) -> bool {
        match self.sent.lock() {
            Ok(mut sent) => sent.push((user.clone(), notification.clone())),
            Err(poisoned) => poisoned.into_inner().push((user.clone(), notification.clone())),
        }
        true
    }
}
