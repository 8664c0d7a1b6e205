use std::sync::Arc;

use tracing::Instrument;

use crate::clock::{floor_to_interval, Clock};
use crate::config::ReporterConfig;
use crate::engine::ShutdownToken;
use crate::meter::MeterRegistry;
use crate::store::{MeterLogRow, MeterLogStore};
use crate::telemetry;

/// Drains the meter registry into the durable meter log.
///
/// Runs periodically on the engine's schedule and can be triggered manually
/// for operational or test purposes. Each reporter owns one registry; several
/// reporters with distinct identities may share a store without
/// coordination.
pub struct MetricsReporter {
    registry: Arc<MeterRegistry>,
    store: Arc<dyn MeterLogStore>,
    config: ReporterConfig,
    clock: Arc<dyn Clock>,
}

impl MetricsReporter {
    pub fn new(
        registry: Arc<MeterRegistry>,
        store: Arc<dyn MeterLogStore>,
        config: ReporterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            clock,
        }
    }

    pub fn reporter_id(&self) -> &str {
        &self.config.reporter_id
    }

    /// Flush every registered meter once.
    ///
    /// Meters are drained with an atomic read-and-reset; zero values write no
    /// row. If an insert fails, the drained value is added back onto the
    /// meter so the counts survive until the next activation. Returns the
    /// number of rows written.
    pub async fn report_now(&self) -> anyhow::Result<u64> {
        let span = telemetry::reporter_flush_span(&self.config.reporter_id);
        self.flush_all().instrument(span).await
    }

    async fn flush_all(&self) -> anyhow::Result<u64> {
        let timestamp = floor_to_interval(self.clock.now(), self.config.row_granularity_ms);
        let mut written = 0u64;

        for meter in self.registry.meters() {
            let value = meter.get_and_clear();
            if value == 0 {
                continue;
            }

            let row = MeterLogRow {
                timestamp,
                name: meter.name().to_string(),
                reporter: self.config.reporter_id.clone(),
                value,
            };
            if let Err(error) = self.store.insert(&row).await {
                meter.mark_times(value);
                tracing::warn!(
                    meter = meter.name(),
                    reporter = %self.config.reporter_id,
                    error = %error,
                    "meter flush failed, value restored"
                );
                return Err(error);
            }
            written += 1;
        }

        tracing::debug!(
            reporter = %self.config.reporter_id,
            rows = written,
            "meter registry flushed"
        );
        Ok(written)
    }

    /// Spawn the periodic flush loop. Stops, after one final flush, when the
    /// shutdown token fires.
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownToken) -> tokio::task::JoinHandle<()> {
        let interval = tokio::time::Duration::from_millis(self.config.flush_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Err(err) = self.report_now().await {
                            tracing::warn!("final meter flush failed: {err}");
                        }
                        tracing::info!(reporter = %self.config.reporter_id, "metrics reporter shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.report_now().await {
                            tracing::warn!("periodic meter flush failed: {err}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::persistence::memory::InMemoryMeterLogStore;
    use crate::store::MeterLogFilter;

    fn reporter(
        registry: Arc<MeterRegistry>,
        store: Arc<InMemoryMeterLogStore>,
    ) -> MetricsReporter {
        MetricsReporter::new(
            registry,
            store,
            ReporterConfig::default().with_reporter_id("test-reporter"),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_report_now_drains_non_zero_meters() {
        let registry = Arc::new(MeterRegistry::empty());
        registry.mark_times("job-successful", 5);
        registry.register("job-failed"); // stays at zero

        let store = Arc::new(InMemoryMeterLogStore::new());
        let written = reporter(Arc::clone(&registry), Arc::clone(&store))
            .report_now()
            .await
            .unwrap();

        assert_eq!(written, 1);
        let rows = store.scan(&MeterLogFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "job-successful");
        assert_eq!(rows[0].reporter, "test-reporter");
        assert_eq!(rows[0].value, 5);

        // Drained, so a second activation writes nothing.
        assert_eq!(registry.meter("job-successful").unwrap().get(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_restores_drained_value() {
        use crate::store::MeterLogFilter;
        use async_trait::async_trait;

        struct BrokenStore;

        #[async_trait]
        impl MeterLogStore for BrokenStore {
            async fn insert(&self, _row: &MeterLogRow) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }

            async fn scan(&self, _filter: &MeterLogFilter) -> anyhow::Result<Vec<MeterLogRow>> {
                Ok(Vec::new())
            }

            async fn delete_all(&self, _reporter: Option<&str>) -> anyhow::Result<u64> {
                Ok(0)
            }
        }

        let registry = Arc::new(MeterRegistry::empty());
        registry.mark_times("job-successful", 4);

        let reporter = MetricsReporter::new(
            Arc::clone(&registry),
            Arc::new(BrokenStore),
            ReporterConfig::default(),
            Arc::new(SystemClock),
        );

        assert!(reporter.report_now().await.is_err());
        // The drained value went back onto the meter.
        assert_eq!(registry.meter("job-successful").unwrap().get(), 4);
    }

    #[tokio::test]
    async fn test_repeated_flushes_append_additive_rows() {
        let registry = Arc::new(MeterRegistry::empty());
        let store = Arc::new(InMemoryMeterLogStore::new());
        let reporter = reporter(Arc::clone(&registry), Arc::clone(&store));

        registry.mark_times("job-successful", 2);
        reporter.report_now().await.unwrap();
        registry.mark_times("job-successful", 3);
        reporter.report_now().await.unwrap();

        let rows = store.scan(&MeterLogFilter::default()).await.unwrap();
        let total: i64 = rows.iter().map(|r| r.value).sum();
        assert_eq!(total, 5);
    }
}
