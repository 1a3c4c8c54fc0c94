use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::reservation::{ReservationId, ReservationStatus, StepStatus};
use crate::domain::user::Actor;

pub const EXPIRED_STEP_COMMENT: &str = "Auto-cancelled: reservation expired";
pub const SWEEP_COMMENT: &str = "Auto-cancelled by system cleanup job";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    StepApproved,
    StepRejected,
    FullyApproved,
    Rejected,
    Cancelled,
    AutoCancelled,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::FullyApproved => "fully_approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::AutoCancelled => "auto_cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "step_approved" => Some(Self::StepApproved),
            "step_rejected" => Some(Self::StepRejected),
            "fully_approved" => Some(Self::FullyApproved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "auto_cancelled" => Some(Self::AutoCancelled),
            _ => None,
        }
    }
}

/// One append-only activity record. Step entries carry step statuses in `old_status` and
/// `new_status`; reservation entries carry reservation statuses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub action: ActivityAction,
    pub description: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub step_order: Option<u32>,
    pub comment: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub occurred_at: NaiveDateTime,
}

impl ActivityLogEntry {
    pub fn new(
        reservation_id: ReservationId,
        actor: Actor,
        action: ActivityAction,
        description: impl Into<String>,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            reservation_id,
            actor,
            action,
            description: description.into(),
            old_status: None,
            new_status: None,
            step_order: None,
            comment: None,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_reservation_status(
        mut self,
        old_status: ReservationStatus,
        new_status: ReservationStatus,
    ) -> Self {
        self.old_status = Some(old_status.as_str().to_owned());
        self.new_status = Some(new_status.as_str().to_owned());
        self
    }

    pub fn with_step_status(
        mut self,
        step_order: u32,
        old_status: StepStatus,
        new_status: StepStatus,
    ) -> Self {
        self.step_order = Some(step_order);
        self.old_status = Some(old_status.as_str().to_owned());
        self.new_status = Some(new_status.as_str().to_owned());
        self
    }

    pub fn with_comment(mut self, comment: Option<&str>) -> Self {
        self.comment = comment.map(str::to_owned);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata serialised for storage; `None` when empty.
    pub fn metadata_json(&self) -> Option<String> {
        if self.metadata.is_empty() {
            return None;
        }
        serde_json::to_string(&self.metadata).ok()
    }
}
