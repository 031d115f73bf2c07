use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn offset(&self) -> UtcOffset;

    fn now_millis(&self) -> i64 {
        to_millis(self.now())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Uses the host's current offset, or UTC when it cannot be determined
    /// (for example once other threads are running on Unix).
    pub fn local() -> Self {
        let offset = UtcOffset::current_local_offset().unwrap_or_else(|err| {
            tracing::debug!(?err, "local offset unavailable, using UTC");
            UtcOffset::UTC
        });
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    fn offset(&self) -> UtcOffset {
        self.offset
    }
}

#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }

    fn offset(&self) -> UtcOffset {
        self.now.lock().offset()
    }
}

pub fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_millis(millis: i64, offset: UtcOffset) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .map(|at| at.to_offset(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn millis_round_trip_keeps_offset() {
        let at = datetime!(2024-05-01 09:30:15.250 +02:00);
        let millis = to_millis(at);
        let back = from_millis(millis, at.offset()).expect("in range");
        assert_eq!(back, at);
        assert_eq!(back.offset(), at.offset());
    }

    #[test]
    fn manual_clock_advances_shared_state() {
        let clock = ManualClock::new(datetime!(2024-05-01 00:00 UTC));
        let handle = clock.clone();
        handle.advance(Duration::minutes(5));
        assert_eq!(clock.now(), datetime!(2024-05-01 00:05 UTC));
        assert_eq!(clock.now_millis(), to_millis(datetime!(2024-05-01 00:05 UTC)));
    }
}
