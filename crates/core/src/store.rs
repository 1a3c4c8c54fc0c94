//! Storage port.
//!
//! Every mutation runs through a [`StoreTransaction`]. Dropping a transaction without calling
//! [`StoreTransaction::commit`] rolls it back, so an early `?` return never leaves partial rows.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::activity::ActivityLogEntry;
use crate::conflict::BookedSlot;
use crate::domain::reservation::{
    ApprovalStep, ApprovalStepId, NewReservation, Reservation, ReservationDetail, ReservationId,
    ReservationStatus, StepStatus,
};
use crate::domain::resource::{Resource, ResourceId};
use crate::domain::slot::TimeSlot;
use crate::domain::user::UserId;
use crate::domain::workflow::WorkflowStep;
use crate::views::{
    ApprovalDecision, CalendarEntry, CalendarQuery, PendingApproval, RequesterReservation,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Pending reservations whose earliest slot starts strictly before `now`.
    async fn expired_pending(&self, now: NaiveDateTime) -> Result<Vec<ReservationId>, StoreError>;

    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError>;
    async fn workflow(&self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError>;
    async fn booked_slots(
        &self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError>;

    async fn reservation_detail(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationDetail>, StoreError>;
    async fn calendar(&self, query: &CalendarQuery) -> Result<Vec<CalendarEntry>, StoreError>;
    /// Every reservation the user requested, newest first.
    async fn reservations_for_requester(
        &self,
        requester_id: &UserId,
    ) -> Result<Vec<RequesterReservation>, StoreError>;
    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingApproval>, StoreError>;
    async fn decisions_by_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalDecision>, StoreError>;
    async fn activity_for(&self, id: ReservationId) -> Result<Vec<ActivityLogEntry>, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>, StoreError>;
    async fn insert_resource(&mut self, name: &str, category: &str)
        -> Result<Resource, StoreError>;

    async fn workflow(&mut self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError>;
    /// Deletes every step of the resource's workflow, then inserts `steps`.
    async fn replace_workflow(
        &mut self,
        resource_id: ResourceId,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError>;

    /// Slots of `pending`/`approved` reservations on the resource for any of `dates`.
    async fn booked_slots(
        &mut self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError>;

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> Result<Reservation, StoreError>;
    async fn insert_slots(
        &mut self,
        reservation_id: ReservationId,
        slots: &[TimeSlot],
    ) -> Result<(), StoreError>;
    /// Inserts one pending step per workflow entry, in `step_order`.
    async fn insert_steps(
        &mut self,
        reservation_id: ReservationId,
        steps: &[WorkflowStep],
    ) -> Result<Vec<ApprovalStep>, StoreError>;

    async fn find_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;
    async fn find_step(&mut self, id: ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError>;
    async fn slots_for(&mut self, reservation_id: ReservationId)
        -> Result<Vec<TimeSlot>, StoreError>;
    async fn steps_for(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ApprovalStep>, StoreError>;

    /// Conditional update of a step from `pending`. Returns `false` when no row matched, which
    /// is how a concurrent decision on the same step is detected.
    async fn decide_step(
        &mut self,
        id: ApprovalStepId,
        approver_id: &UserId,
        status: StepStatus,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Compare-and-set of the reservation status.
    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<bool, StoreError>;

    /// Moves every pending step of the reservation to `cancelled`, returning how many moved.
    async fn cancel_pending_steps(
        &mut self,
        reservation_id: ReservationId,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
