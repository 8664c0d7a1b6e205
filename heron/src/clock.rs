use chrono::{DateTime, TimeZone, Utc};

/// Source of the engine's notion of "now".
///
/// Every timestamp the engine writes (retry due dates, incident creation
/// times, meter log rows, live query buckets) flows through this trait so
/// tests can drive time explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside of tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Floors a timestamp to the start of the interval containing it.
///
/// `interval_millis` must be positive.
pub(crate) fn floor_to_interval(ts: DateTime<Utc>, interval_millis: i64) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    let floored = millis.div_euclid(interval_millis) * interval_millis;
    Utc.timestamp_millis_opt(floored)
        .single()
        .unwrap_or(ts)
}
