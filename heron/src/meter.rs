use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Well-known meter names tracked by the engine.
///
/// Handlers and embedding code may register additional names; these are the
/// ones the engine itself pre-registers and marks.
pub mod names {
    pub const ACTIVITY_INSTANCE_START: &str = "activity-instance-start";
    pub const ACTIVITY_INSTANCE_END: &str = "activity-instance-end";
    pub const JOB_SUCCESSFUL: &str = "job-successful";
    pub const JOB_FAILED: &str = "job-failed";
    pub const JOB_ACQUISITION_ATTEMPT: &str = "job-acquisition-attempt";
    pub const JOB_ACQUIRED_SUCCESS: &str = "job-acquired-success";
    pub const JOB_ACQUIRED_FAILURE: &str = "job-acquired-failure";
    pub const JOB_EXECUTION_REJECTED: &str = "job-execution-rejected";
    pub const JOB_LOCKED_EXCLUSIVE: &str = "job-locked-exclusive";

    /// Names pre-registered by [`super::MeterRegistry::new`].
    pub const BUILT_IN: &[&str] = &[
        ACTIVITY_INSTANCE_START,
        ACTIVITY_INSTANCE_END,
        JOB_SUCCESSFUL,
        JOB_FAILED,
        JOB_ACQUISITION_ATTEMPT,
        JOB_ACQUIRED_SUCCESS,
        JOB_ACQUIRED_FAILURE,
        JOB_EXECUTION_REJECTED,
        JOB_LOCKED_EXCLUSIVE,
    ];
}

/// A named, monotonically incremented event counter.
///
/// Increments are lock-free and safe under arbitrary concurrent callers.
/// The value is only ever reset through [`Meter::get_and_clear`].
#[derive(Debug)]
pub struct Meter {
    name: String,
    value: AtomicI64,
}

impl Meter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count one event.
    pub fn mark(&self) {
        self.mark_times(1);
    }

    /// Count `times` events at once.
    pub fn mark_times(&self, times: i64) {
        self.value.fetch_add(times, Ordering::Relaxed);
    }

    /// Current value without resetting it.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Atomically read and reset the counter.
    ///
    /// A single indivisible swap: increments racing with the reset land
    /// either in the returned value or in the next cycle, never in both and
    /// never nowhere.
    pub fn get_and_clear(&self) -> i64 {
        self.value.swap(0, Ordering::AcqRel)
    }
}

/// Mapping from counter name to meter.
///
/// An explicitly constructed object owned by the engine (one per reporter
/// identity), not a process-wide table; its lifetime is tied to engine
/// startup and shutdown.
#[derive(Debug, Default)]
pub struct MeterRegistry {
    meters: RwLock<HashMap<String, Arc<Meter>>>,
}

impl MeterRegistry {
    /// Create a registry with the engine's built-in meters pre-registered.
    pub fn new() -> Self {
        let registry = Self::default();
        for name in names::BUILT_IN {
            registry.register(*name);
        }
        registry
    }

    /// Create an empty registry with no pre-registered meters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a meter under the given name, returning it. Registering an
    /// existing name returns the existing meter with its value intact.
    pub fn register(&self, name: impl Into<String>) -> Arc<Meter> {
        let name = name.into();
        let mut meters = self.meters.write();
        Arc::clone(
            meters
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Meter::new(name))),
        )
    }

    /// Look up a meter by name.
    pub fn meter(&self, name: &str) -> Option<Arc<Meter>> {
        self.meters.read().get(name).cloned()
    }

    /// Count one event on the named meter, registering it if needed.
    pub fn mark(&self, name: &str) {
        if let Some(meter) = self.meter(name) {
            meter.mark();
        } else {
            self.register(name).mark();
        }
    }

    /// Count `times` events on the named meter, registering it if needed.
    pub fn mark_times(&self, name: &str, times: i64) {
        if let Some(meter) = self.meter(name) {
            meter.mark_times(times);
        } else {
            self.register(name).mark_times(times);
        }
    }

    /// All registered meters.
    pub fn meters(&self) -> Vec<Arc<Meter>> {
        self.meters.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_get() {
        let meter = Meter::new("test");
        meter.mark();
        meter.mark_times(4);
        assert_eq!(meter.get(), 5);
        // get() does not reset
        assert_eq!(meter.get(), 5);
    }

    #[test]
    fn test_get_and_clear_round_trip() {
        let meter = Meter::new("test");
        meter.mark_times(7);
        assert_eq!(meter.get_and_clear(), 7);
        assert_eq!(meter.get_and_clear(), 0);
    }

    #[test]
    fn test_registry_pre_registers_built_ins() {
        let registry = MeterRegistry::new();
        for name in names::BUILT_IN {
            assert!(registry.meter(name).is_some(), "missing built-in {name}");
        }
    }

    #[test]
    fn test_registry_register_is_idempotent() {
        let registry = MeterRegistry::empty();
        registry.register("custom").mark_times(3);
        registry.register("custom");
        assert_eq!(registry.meter("custom").unwrap().get(), 3);
    }

    #[test]
    fn test_mark_unknown_name_registers() {
        let registry = MeterRegistry::empty();
        registry.mark("fresh");
        assert_eq!(registry.meter("fresh").unwrap().get(), 1);
    }

    #[test]
    fn test_concurrent_increments_survive_drains() {
        let meter = Arc::new(Meter::new("contended"));
        let total_threads = 8;
        let marks_per_thread = 10_000;

        let drained = Arc::new(AtomicI64::new(0));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let drainer = {
            let meter = Arc::clone(&meter);
            let drained = Arc::clone(&drained);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    drained.fetch_add(meter.get_and_clear(), Ordering::Relaxed);
                }
            })
        };

        let markers: Vec<_> = (0..total_threads)
            .map(|_| {
                let meter = Arc::clone(&meter);
                std::thread::spawn(move || {
                    for _ in 0..marks_per_thread {
                        meter.mark();
                    }
                })
            })
            .collect();

        for handle in markers {
            handle.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        drainer.join().unwrap();

        // Every increment is recovered across drain cycles plus whatever is
        // still on the meter; nothing lost, nothing double-counted.
        let recovered = drained.load(Ordering::Relaxed) + meter.get();
        assert_eq!(recovered, total_threads * marks_per_thread);
    }
}
