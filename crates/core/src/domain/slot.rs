use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// One contiguous `[start_time, end_time)` interval on a single calendar date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self { date, start_time, end_time }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_time < self.end_time
    }

    /// Half-open intersection on the same date: `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.date == other.date
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date.format(DATE_FORMAT),
            self.start_time.format(TIME_FORMAT),
            self.end_time.format(TIME_FORMAT)
        )
    }
}

/// Earliest `date + start_time` across the given slots.
pub fn earliest_start(slots: &[TimeSlot]) -> Option<NaiveDateTime> {
    slots.iter().map(TimeSlot::starts_at).min()
}

/// `(min date, max date)` envelope spanning every slot.
pub fn date_envelope(slots: &[TimeSlot]) -> Option<(NaiveDate, NaiveDate)> {
    let from = slots.iter().map(|slot| slot.date).min()?;
    let to = slots.iter().map(|slot| slot.date).max()?;
    Some((from, to))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// Accepts `HH:MM:SS` and the shorter `HH:MM`.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}
