use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use reserva_core::activity::ActivityLogEntry;
use reserva_core::conflict::BookedSlot;
use reserva_core::domain::reservation::{
    ApprovalStep, ApprovalStepId, NewReservation, Reservation, ReservationDetail, ReservationId,
    ReservationStatus, StepStatus,
};
use reserva_core::domain::resource::{Resource, ResourceId};
use reserva_core::domain::slot::{earliest_start, TimeSlot};
use reserva_core::domain::user::UserId;
use reserva_core::domain::workflow::WorkflowStep;
use reserva_core::store::{ReservationStore, StoreError, StoreTransaction};
use reserva_core::views::{
    ApprovalDecision, CalendarEntry, CalendarQuery, PendingApproval, RequesterReservation,
};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    resources: BTreeMap<ResourceId, Resource>,
    workflows: BTreeMap<ResourceId, Vec<WorkflowStep>>,
    reservations: BTreeMap<ReservationId, Reservation>,
    slots: BTreeMap<ReservationId, Vec<TimeSlot>>,
    steps: BTreeMap<ApprovalStepId, ApprovalStep>,
    activity: Vec<ActivityLogEntry>,
    next_resource_id: i64,
    next_reservation_id: i64,
    next_step_id: i64,
    failing: BTreeSet<ReservationId>,
}

impl MemoryState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn resource_name(&self, id: ResourceId) -> String {
        self.resources.get(&id).map(|resource| resource.name.clone()).unwrap_or_default()
    }

    fn slots_for(&self, id: ReservationId) -> Vec<TimeSlot> {
        let mut slots = self.slots.get(&id).cloned().unwrap_or_default();
        slots.sort();
        slots
    }

    fn steps_for(&self, id: ReservationId) -> Vec<ApprovalStep> {
        let mut steps: Vec<ApprovalStep> =
            self.steps.values().filter(|step| step.reservation_id == id).cloned().collect();
        steps.sort_by_key(|step| (step.step_order, step.id));
        steps
    }

    fn workflow(&self, resource_id: ResourceId) -> Vec<WorkflowStep> {
        let mut steps = self.workflows.get(&resource_id).cloned().unwrap_or_default();
        steps.sort_by_key(|step| step.step_order);
        steps
    }

    fn booked_slots(&self, resource_id: ResourceId, dates: &[NaiveDate]) -> Vec<BookedSlot> {
        let mut booked: Vec<BookedSlot> = self
            .reservations
            .values()
            .filter(|reservation| {
                reservation.resource_id == resource_id && reservation.status.is_active()
            })
            .flat_map(|reservation| {
                self.slots_for(reservation.id)
                    .into_iter()
                    .filter(move |slot| dates.contains(&slot.date))
                    .map(move |slot| BookedSlot {
                        reservation_id: reservation.id,
                        purpose: reservation.purpose.clone(),
                        requester_id: reservation.requester_id.clone(),
                        status: reservation.status,
                        slot,
                    })
            })
            .collect();
        booked.sort_by_key(|entry| (entry.slot, entry.reservation_id));
        booked
    }

    fn check_failure(&self, id: ReservationId) -> Result<(), StoreError> {
        if self.failing.contains(&id) {
            return Err(StoreError::Database(format!("injected failure for reservation {id}")));
        }
        Ok(())
    }
}

/// In-memory store for tests and local runs. A transaction holds the state lock for its whole
/// lifetime and works on a copy; `commit` writes the copy back and dropping it discards it.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transactional lookup of `id` fail with a database error.
    pub async fn fail_on_reservation(&self, id: ReservationId) {
        self.state.lock().await.failing.insert(id);
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }

    async fn expired_pending(&self, now: NaiveDateTime) -> Result<Vec<ReservationId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .values()
            .filter(|reservation| reservation.status == ReservationStatus::Pending)
            .filter(|reservation| {
                earliest_start(&state.slots_for(reservation.id)).is_some_and(|start| start < now)
            })
            .map(|reservation| reservation.id)
            .collect())
    }

    async fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.state.lock().await.resources.get(&id).cloned())
    }

    async fn workflow(&self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError> {
        Ok(self.state.lock().await.workflow(resource_id))
    }

    async fn booked_slots(
        &self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError> {
        Ok(self.state.lock().await.booked_slots(resource_id, dates))
    }

    async fn reservation_detail(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationDetail>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.reservations.get(&id).cloned().map(|reservation| ReservationDetail {
            reservation,
            slots: state.slots_for(id),
            steps: state.steps_for(id),
        }))
    }

    async fn calendar(&self, query: &CalendarQuery) -> Result<Vec<CalendarEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<CalendarEntry> = state
            .reservations
            .values()
            .filter(|reservation| reservation.status.is_active())
            .filter(|reservation| query.resource_id.map_or(true, |id| reservation.resource_id == id))
            .filter(|reservation| query.intersects(reservation.date_from, reservation.date_to))
            .map(|reservation| CalendarEntry {
                reservation: reservation.clone(),
                resource_name: state.resource_name(reservation.resource_id),
                slots: state.slots_for(reservation.id),
            })
            .collect();
        entries.sort_by_key(|entry| (entry.reservation.date_from, entry.reservation.id));
        Ok(entries)
    }

    async fn reservations_for_requester(
        &self,
        requester_id: &UserId,
    ) -> Result<Vec<RequesterReservation>, StoreError> {
        let state = self.state.lock().await;
        let mut reservations: Vec<RequesterReservation> = state
            .reservations
            .values()
            .filter(|reservation| &reservation.requester_id == requester_id)
            .map(|reservation| RequesterReservation {
                reservation: reservation.clone(),
                resource_name: state.resource_name(reservation.resource_id),
                slots: state.slots_for(reservation.id),
                steps: state.steps_for(reservation.id),
            })
            .collect();
        reservations.sort_by(|a, b| {
            (b.reservation.created_at, b.reservation.id)
                .cmp(&(a.reservation.created_at, a.reservation.id))
        });
        Ok(reservations)
    }

    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingApproval>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<PendingApproval> = state
            .steps
            .values()
            .filter(|step| &step.approver_id == approver_id && step.status == StepStatus::Pending)
            .filter_map(|step| {
                let reservation = state.reservations.get(&step.reservation_id)?;
                (reservation.status == ReservationStatus::Pending).then(|| PendingApproval {
                    step: step.clone(),
                    reservation: reservation.clone(),
                    resource_name: state.resource_name(reservation.resource_id),
                    slots: state.slots_for(reservation.id),
                    total_steps: u32::try_from(state.steps_for(reservation.id).len())
                        .unwrap_or(u32::MAX),
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            (b.reservation.created_at, b.reservation.id)
                .cmp(&(a.reservation.created_at, a.reservation.id))
                .then(a.step.step_order.cmp(&b.step.step_order))
        });
        Ok(pending)
    }

    async fn decisions_by_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalDecision>, StoreError> {
        let state = self.state.lock().await;
        let mut decisions: Vec<ApprovalDecision> = state
            .steps
            .values()
            .filter(|step| {
                &step.approver_id == approver_id
                    && matches!(step.status, StepStatus::Approved | StepStatus::Rejected)
            })
            .filter_map(|step| {
                let reservation = state.reservations.get(&step.reservation_id)?;
                Some(ApprovalDecision {
                    step: step.clone(),
                    reservation: reservation.clone(),
                    resource_name: state.resource_name(reservation.resource_id),
                })
            })
            .collect();
        decisions.sort_by(|a, b| (b.step.acted_at, b.step.id).cmp(&(a.step.acted_at, a.step.id)));
        Ok(decisions)
    }

    async fn activity_for(&self, id: ReservationId) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.activity.iter().filter(|entry| entry.reservation_id == id).cloned().collect())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.working.resources.get(&id).cloned())
    }

    async fn insert_resource(
        &mut self,
        name: &str,
        category: &str,
    ) -> Result<Resource, StoreError> {
        let id = ResourceId(MemoryState::next_id(&mut self.working.next_resource_id));
        let resource = Resource { id, name: name.to_owned(), category: category.to_owned() };
        self.working.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn workflow(&mut self, resource_id: ResourceId) -> Result<Vec<WorkflowStep>, StoreError> {
        Ok(self.working.workflow(resource_id))
    }

    async fn replace_workflow(
        &mut self,
        resource_id: ResourceId,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        if steps.is_empty() {
            self.working.workflows.remove(&resource_id);
        } else {
            self.working.workflows.insert(resource_id, steps.to_vec());
        }
        Ok(())
    }

    async fn booked_slots(
        &mut self,
        resource_id: ResourceId,
        dates: &[NaiveDate],
    ) -> Result<Vec<BookedSlot>, StoreError> {
        Ok(self.working.booked_slots(resource_id, dates))
    }

    async fn insert_reservation(
        &mut self,
        reservation: &NewReservation,
    ) -> Result<Reservation, StoreError> {
        if !self.working.resources.contains_key(&reservation.resource_id) {
            return Err(StoreError::Database(format!(
                "foreign key violation: resource {}",
                reservation.resource_id
            )));
        }
        let id = ReservationId(MemoryState::next_id(&mut self.working.next_reservation_id));
        let stored = Reservation {
            id,
            resource_id: reservation.resource_id,
            requester_id: reservation.requester_id.clone(),
            purpose: reservation.purpose.clone(),
            date_from: reservation.date_from,
            date_to: reservation.date_to,
            status: ReservationStatus::Pending,
            created_at: reservation.created_at,
        };
        self.working.reservations.insert(id, stored.clone());
        Ok(stored)
    }

    async fn insert_slots(
        &mut self,
        reservation_id: ReservationId,
        slots: &[TimeSlot],
    ) -> Result<(), StoreError> {
        self.working.slots.entry(reservation_id).or_default().extend_from_slice(slots);
        Ok(())
    }

    async fn insert_steps(
        &mut self,
        reservation_id: ReservationId,
        steps: &[WorkflowStep],
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        let mut created = Vec::with_capacity(steps.len());
        for step in steps {
            let id = ApprovalStepId(MemoryState::next_id(&mut self.working.next_step_id));
            let stored = ApprovalStep {
                id,
                reservation_id,
                step_order: step.step_order,
                approver_id: step.approver_id.clone(),
                status: StepStatus::Pending,
                acted_at: None,
                comment: None,
            };
            self.working.steps.insert(id, stored.clone());
            created.push(stored);
        }
        Ok(created)
    }

    async fn find_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        self.working.check_failure(id)?;
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn find_step(&mut self, id: ApprovalStepId) -> Result<Option<ApprovalStep>, StoreError> {
        Ok(self.working.steps.get(&id).cloned())
    }

    async fn slots_for(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<TimeSlot>, StoreError> {
        Ok(self.working.slots_for(reservation_id))
    }

    async fn steps_for(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ApprovalStep>, StoreError> {
        Ok(self.working.steps_for(reservation_id))
    }

    async fn decide_step(
        &mut self,
        id: ApprovalStepId,
        approver_id: &UserId,
        status: StepStatus,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<bool, StoreError> {
        match self.working.steps.get_mut(&id) {
            Some(step)
                if &step.approver_id == approver_id && step.status == StepStatus::Pending =>
            {
                step.status = status;
                step.acted_at = Some(acted_at);
                step.comment = comment.map(str::to_owned);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<bool, StoreError> {
        match self.working.reservations.get_mut(&id) {
            Some(reservation) if reservation.status == from => {
                reservation.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_pending_steps(
        &mut self,
        reservation_id: ReservationId,
        acted_at: NaiveDateTime,
        comment: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut cancelled = 0;
        for step in self.working.steps.values_mut().filter(|step| {
            step.reservation_id == reservation_id && step.status == StepStatus::Pending
        }) {
            step.status = StepStatus::Cancelled;
            step.acted_at = Some(acted_at);
            step.comment = comment.map(str::to_owned);
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        self.working.activity.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
