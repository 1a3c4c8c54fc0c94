use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// Source of "now". Local time is the reference calendar every date rule is evaluated in.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn offset(&self) -> FixedOffset;

    fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.offset()).naive_local()
    }
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now_utc(&self) -> DateTime<Utc> {
        (**self).now_utc()
    }

    fn offset(&self) -> FixedOffset {
        (**self).offset()
    }
}

/// Builds a fixed offset from minutes east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

#[derive(Clone, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Settable clock; clones share the same instant.
#[derive(Clone, Debug)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now: Arc::new(RwLock::new(now)), offset }
    }

    /// Pins the clock to a wall-clock time in the reference calendar.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = offset
            .from_local_datetime(&local)
            .single()
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&(local - offset_duration(offset))));
        Self::new(utc, offset)
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let utc = Utc.from_utc_datetime(&(local - offset_duration(self.offset)));
        match self.now.write() {
            Ok(mut now) => *now = utc,
            Err(poisoned) => *poisoned.into_inner() = utc,
        }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.write() {
            Ok(mut now) => *now += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

fn offset_duration(offset: FixedOffset) -> Duration {
    Duration::seconds(i64::from(offset.local_minus_utc()))
}
