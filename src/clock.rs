//! Injectable time source so promotion timing is deterministic under test.

use std::sync::Mutex;

use time::OffsetDateTime;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current instant, always expressed in UTC.
    fn now(&self) -> OffsetDateTime;
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Test double returning a manually controlled instant.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Replace the reported instant.
    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap() = now;
    }

    /// Move the reported instant forward.
    pub fn advance(&self, by: time::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}
