//! Read models handed to calendar, requester and approval-log consumers.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::reservation::{ApprovalStep, Reservation, StepStatus};
use crate::domain::resource::ResourceId;
use crate::domain::slot::TimeSlot;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub resource_id: Option<ResourceId>,
}

impl CalendarQuery {
    /// True when `[date_from, date_to]` intersects the query range.
    pub fn intersects(&self, date_from: NaiveDate, date_to: NaiveDate) -> bool {
        date_from <= self.to && self.from <= date_to
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub reservation: Reservation,
    pub resource_name: String,
    pub slots: Vec<TimeSlot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub step: ApprovalStep,
    pub reservation: Reservation,
    pub resource_name: String,
    pub slots: Vec<TimeSlot>,
    pub total_steps: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub step: ApprovalStep,
    pub reservation: Reservation,
    pub resource_name: String,
}

/// One of the requester's own reservations, with the progress of its approval chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterReservation {
    pub reservation: Reservation,
    pub resource_name: String,
    pub slots: Vec<TimeSlot>,
    pub steps: Vec<ApprovalStep>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
}

impl DecisionCounts {
    fn record(&mut self, status: StepStatus) {
        match status {
            StepStatus::Approved => self.approved += 1,
            StepStatus::Rejected => self.rejected += 1,
            StepStatus::Pending | StepStatus::Cancelled => return,
        }
        self.total += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDecisionCounts {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counts: DecisionCounts,
}

/// Decision totals of one approver since `since`, with a per-day breakdown newest day first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub approver_id: UserId,
    pub period_days: u32,
    pub since: NaiveDateTime,
    pub totals: DecisionCounts,
    pub daily: Vec<DailyDecisionCounts>,
}

impl DecisionStats {
    /// Aggregates the decisions acted on at or after `since`. Undated steps are skipped.
    pub fn from_decisions(
        approver_id: UserId,
        period_days: u32,
        since: NaiveDateTime,
        decisions: &[ApprovalDecision],
    ) -> Self {
        let mut totals = DecisionCounts::default();
        let mut by_day: BTreeMap<NaiveDate, DecisionCounts> = BTreeMap::new();

        for decision in decisions {
            let Some(acted_at) = decision.step.acted_at.filter(|acted_at| *acted_at >= since) else {
                continue;
            };
            totals.record(decision.step.status);
            by_day.entry(acted_at.date()).or_default().record(decision.step.status);
        }

        let daily = by_day
            .into_iter()
            .rev()
            .map(|(date, counts)| DailyDecisionCounts { date, counts })
            .collect();
        Self { approver_id, period_days, since, totals, daily }
    }
}
