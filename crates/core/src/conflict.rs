//! Time-slot conflict detection.
//!
//! Candidates are normalised first (well-formed, deduplicated, no self-overlap), then compared
//! against the slots of active reservations on the same resource. Comparison happens here, in
//! memory, so both stores share one overlap rule; the store only narrows by resource and date.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::reservation::{ReservationId, ReservationStatus};
use crate::domain::slot::TimeSlot;
use crate::domain::user::UserId;

/// A slot already held by an active reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedSlot {
    pub reservation_id: ReservationId,
    pub purpose: String,
    pub requester_id: UserId,
    pub status: ReservationStatus,
    pub slot: TimeSlot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConflict {
    pub candidate: TimeSlot,
    pub conflicts: Vec<BookedSlot>,
}

/// Candidates that collided, each with the booked slots it collided with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictList(pub Vec<SlotConflict>);

impl ConflictList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conflict_count(&self) -> usize {
        self.0.iter().map(|entry| entry.conflicts.len()).sum()
    }

    pub fn reservation_ids(&self) -> BTreeSet<ReservationId> {
        self.0
            .iter()
            .flat_map(|entry| entry.conflicts.iter().map(|booked| booked.reservation_id))
            .collect()
    }
}

/// Validates a candidate slot list and returns it sorted and deduplicated.
pub fn normalize_candidates(slots: &[TimeSlot]) -> Result<Vec<TimeSlot>, String> {
    if slots.is_empty() {
        return Err("at least one time slot is required".to_owned());
    }

    if let Some(bad) = slots.iter().find(|slot| !slot.is_well_formed()) {
        return Err(format!("slot {bad} must start before it ends"));
    }

    let unique: Vec<TimeSlot> =
        slots.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

    // Sorted by (date, start), so any self-overlap shows up between neighbours.
    for pair in unique.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(format!("slots {} and {} overlap each other", pair[0], pair[1]));
        }
    }

    Ok(unique)
}

/// Distinct dates touched by the candidates, used to narrow the booked-slot lookup.
pub fn candidate_dates(candidates: &[TimeSlot]) -> Vec<NaiveDate> {
    candidates.iter().map(|slot| slot.date).collect::<BTreeSet<_>>().into_iter().collect()
}

pub fn find_conflicts(candidates: &[TimeSlot], booked: &[BookedSlot]) -> ConflictList {
    let entries = candidates
        .iter()
        .filter_map(|candidate| {
            let conflicts: Vec<BookedSlot> = booked
                .iter()
                .filter(|existing| existing.status.is_active())
                .filter(|existing| existing.slot.overlaps(candidate))
                .cloned()
                .collect();
            (!conflicts.is_empty()).then(|| SlotConflict { candidate: *candidate, conflicts })
        })
        .collect();

    ConflictList(entries)
}
