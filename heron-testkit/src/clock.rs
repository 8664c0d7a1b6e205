use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use heron::Clock;
use parking_lot::Mutex;

/// Clock driven explicitly by the test.
///
/// Starts at the Unix epoch so bucket arithmetic in assertions stays
/// readable.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at_millis(0)
    }

    /// Clock set to the given milliseconds since the epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(
                Utc.timestamp_millis_opt(millis).single().expect("valid timestamp"),
            )),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }

    pub fn set_millis(&self, millis: i64) {
        self.set(Utc.timestamp_millis_opt(millis).single().expect("valid timestamp"));
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now().timestamp_millis(), 0);

        clock.set_millis(1_000);
        clock.advance(Duration::milliseconds(500));
        assert_eq!(clock.now().timestamp_millis(), 1_500);
    }
}
