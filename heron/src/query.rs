use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::Clock;
use crate::error::QueryError;
use crate::meter::MeterRegistry;
use crate::store::{MeterLogFilter, MeterLogRow, MeterLogStore};

/// Hard ceiling on rows returned by one interval query.
pub const MAX_INTERVAL_ROWS: usize = 200;

/// Default aggregation interval in seconds (15 minutes).
pub const DEFAULT_INTERVAL_SECS: i64 = 900;

/// One aggregated bucket of an interval query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricIntervalValue {
    /// Start of the bucket.
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub reporter: String,
    pub value: i64,
}

/// Unflushed counter state merged into query results, so a query issued
/// right after an increment reflects it before any reporter activation.
pub(crate) struct LiveCounters {
    pub registry: Arc<MeterRegistry>,
    pub reporter_id: String,
}

/// Filtered, bucketed, paginated aggregate query over the meter log.
///
/// Built via [`crate::engine::JobEngine::create_metrics_query`]; reads both
/// durable rows and the live registry without locking or mutating either.
pub struct MetricsQuery {
    store: Arc<dyn MeterLogStore>,
    live: Option<LiveCounters>,
    clock: Arc<dyn Clock>,
    name: Option<String>,
    reporter: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    first_result: usize,
    max_results: usize,
}

impl MetricsQuery {
    /// Query over durable rows only.
    pub fn new(store: Arc<dyn MeterLogStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            live: None,
            clock,
            name: None,
            reporter: None,
            start_date: None,
            end_date: None,
            first_result: 0,
            max_results: MAX_INTERVAL_ROWS,
        }
    }

    pub(crate) fn with_live(mut self, live: LiveCounters) -> Self {
        self.live = Some(live);
        self
    }

    /// Restrict to one meter name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to one reporter identity.
    pub fn reporter(mut self, reporter: impl Into<String>) -> Self {
        self.reporter = Some(reporter.into());
        self
    }

    /// Inclusive lower bound on row timestamps.
    pub fn start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Exclusive upper bound on row timestamps.
    pub fn end_date(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Cap the number of returned buckets. Values above
    /// [`MAX_INTERVAL_ROWS`] are rejected by `interval`, never clamped.
    pub fn limit(mut self, limit: usize) -> Self {
        self.max_results = limit;
        self
    }

    /// Skip the first `offset` buckets.
    pub fn offset(mut self, offset: usize) -> Self {
        self.first_result = offset;
        self
    }

    /// Index of the first result, 1-based. 1 for an unmodified query.
    pub fn first_row(&self) -> usize {
        self.first_result + 1
    }

    /// Index one past the last possible result. 201 for an unmodified query.
    pub fn last_row(&self) -> usize {
        self.first_result + self.max_results + 1
    }

    pub fn first_result(&self) -> usize {
        self.first_result
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    fn filter(&self) -> MeterLogFilter {
        MeterLogFilter {
            name: self.name.clone(),
            reporter: self.reporter.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    /// Durable rows plus synthetic rows for matching live counters. The
    /// synthetic rows carry "now" as their timestamp and obey the same
    /// filter predicate; the registry is never mutated.
    async fn matching_rows(&self) -> anyhow::Result<Vec<MeterLogRow>> {
        let filter = self.filter();
        let mut rows = self.store.scan(&filter).await?;

        if let Some(live) = &self.live {
            let now = self.clock.now();
            for meter in live.registry.meters() {
                let value = meter.get();
                if value == 0 {
                    continue;
                }
                let row = MeterLogRow {
                    timestamp: now,
                    name: meter.name().to_string(),
                    reporter: live.reporter_id.clone(),
                    value,
                };
                if filter.matches(&row) {
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }

    /// Aggregate with the default 900 s interval.
    pub async fn interval(&self) -> Result<Vec<MetricIntervalValue>, QueryError> {
        self.interval_secs(DEFAULT_INTERVAL_SECS).await
    }

    /// Aggregate matching rows into `interval_secs`-wide buckets, descending
    /// by bucket start.
    pub async fn interval_secs(
        &self,
        interval_secs: i64,
    ) -> Result<Vec<MetricIntervalValue>, QueryError> {
        // Validated before any storage access; never silently clamped.
        if self.max_results > MAX_INTERVAL_ROWS {
            return Err(QueryError::LimitExceeded {
                requested: self.max_results,
            });
        }
        if interval_secs <= 0 {
            return Err(QueryError::InvalidInterval {
                requested: interval_secs,
            });
        }

        let interval_millis = interval_secs * 1000;
        let rows = self.matching_rows().await?;

        let mut groups: HashMap<(i64, String, String), i64> = HashMap::new();
        for row in rows {
            let bucket = row.timestamp.timestamp_millis().div_euclid(interval_millis)
                * interval_millis;
            *groups
                .entry((bucket, row.name, row.reporter))
                .or_insert(0) += row.value;
        }

        let mut buckets: Vec<((i64, String, String), i64)> = groups.into_iter().collect();
        buckets.sort_by(|((ab, an, ar), _), ((bb, bn, br), _)| {
            bb.cmp(ab).then_with(|| an.cmp(bn)).then_with(|| ar.cmp(br))
        });

        Ok(buckets
            .into_iter()
            .skip(self.first_result)
            .take(self.max_results)
            .map(|((bucket, name, reporter), value)| MetricIntervalValue {
                timestamp: Utc
                    .timestamp_millis_opt(bucket)
                    .single()
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                name,
                reporter,
                value,
            })
            .collect())
    }

    /// Total value across every matching row, ignoring bucketing, limit and
    /// offset. Equals the arithmetic sum of an unbounded `interval` over the
    /// same filter.
    pub async fn sum(&self) -> Result<i64, QueryError> {
        let rows = self.matching_rows().await?;
        Ok(rows.iter().map(|row| row.value).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that records whether it was ever scanned.
    #[derive(Default)]
    struct ScanCountingStore {
        scans: AtomicUsize,
    }

    #[async_trait]
    impl MeterLogStore for ScanCountingStore {
        async fn insert(&self, _row: &MeterLogRow) -> anyhow::Result<()> {
            Ok(())
        }

        async fn scan(&self, _filter: &MeterLogFilter) -> anyhow::Result<Vec<MeterLogRow>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn delete_all(&self, _reporter: Option<&str>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_default_pagination_values() {
        let query = MetricsQuery::new(
            Arc::new(ScanCountingStore::default()),
            Arc::new(SystemClock),
        );
        assert_eq!(query.first_row(), 1);
        assert_eq!(query.first_result(), 0);
        assert_eq!(query.max_results(), 200);
        assert_eq!(query.last_row(), 201);
    }

    #[tokio::test]
    async fn test_limit_over_ceiling_rejected_before_storage() {
        let store = Arc::new(ScanCountingStore::default());
        let query = MetricsQuery::new(
            Arc::clone(&store) as Arc<dyn MeterLogStore>,
            Arc::new(SystemClock),
        )
        .limit(1000);

        let err = query.interval().await.unwrap_err();
        assert!(matches!(err, QueryError::LimitExceeded { requested: 1000 }));
        assert_eq!(store.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offset_beyond_data_is_empty_not_error() {
        let query = MetricsQuery::new(
            Arc::new(ScanCountingStore::default()),
            Arc::new(SystemClock),
        )
        .offset(usize::MAX - 300);

        let values = query.interval().await.unwrap();
        assert!(values.is_empty());
    }
}
