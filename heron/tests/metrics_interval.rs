//! Integration tests for the interval-aggregation query engine, driven by a
//! manual clock and manual reporter activations.
//!
//! Data layout used by most tests: 20 generation points at 3-minute steps
//! from the epoch (covering four 15-minute buckets); each point marks
//! `activity-instance-start` and `activity-instance-end` three times and
//! `job-successful` once, then flushes. That yields 3 meter series over
//! 60 minutes of history.

use std::sync::Arc;

use heron::meter::names;
use heron::{
    Clock, EngineConfig, JobEngine, MetricIntervalValue, QueryError, ReporterConfig,
    DEFAULT_INTERVAL_SECS,
};
use heron_testkit::ManualClock;

const REPORTER_ID: &str = "REPORTER_ID";
const MINUTE_MS: i64 = 60 * 1000;
const BUCKET_MS: i64 = 15 * MINUTE_MS;

fn metrics_engine(clock: &ManualClock) -> JobEngine {
    let config = EngineConfig {
        reporter: ReporterConfig::default()
            .disabled()
            .with_reporter_id(REPORTER_ID),
        ..EngineConfig::default()
    };
    JobEngine::builder()
        .with_config(config)
        .with_clock(Arc::new(clock.clone()))
        .build()
}

/// Mirror of the reference data set: 4 buckets, 5 points per bucket.
async fn generate_meter_data(engine: &JobEngine, clock: &ManualClock) {
    let step = BUCKET_MS / 5; // 3 minutes
    let mut ts = 0i64;
    for _ in 0..4 {
        for _ in 0..5 {
            clock.set_millis(ts);
            let meters = engine.meters();
            meters.mark_times(names::ACTIVITY_INSTANCE_START, 3);
            meters.mark_times(names::ACTIVITY_INSTANCE_END, 3);
            meters.mark(names::JOB_SUCCESSFUL);
            engine.report_metrics_now().await.unwrap();
            ts += step;
        }
    }
}

async fn engine_with_data() -> (JobEngine, ManualClock) {
    let clock = ManualClock::new();
    let engine = metrics_engine(&clock);
    generate_meter_data(&engine, &clock).await;
    (engine, clock)
}

fn assert_descending_with_spacing(values: &[MetricIntervalValue], interval_ms: i64) {
    let mut last = values[0].timestamp.timestamp_millis();
    for value in &values[1..] {
        let next = value.timestamp.timestamp_millis();
        if next != last {
            assert_eq!(last, next + interval_ms, "buckets must be contiguous");
            last = next;
        }
    }
}

// LIMIT ///////////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_default_pagination_values() {
    let clock = ManualClock::new();
    let engine = metrics_engine(&clock);
    let query = engine.create_metrics_query();

    assert_eq!(query.first_row(), 1);
    assert_eq!(query.first_result(), 0);
    assert_eq!(query.max_results(), 200);
    assert_eq!(query.last_row(), 201);
}

#[tokio::test]
async fn test_query_decrease_limit() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine.create_metrics_query().limit(2).interval().await.unwrap();
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn test_query_increase_limit_rejected() {
    let (engine, _clock) = engine_with_data().await;

    let err = engine
        .create_metrics_query()
        .limit(1000)
        .interval()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::LimitExceeded { requested: 1000 }));
    assert!(err.to_string().contains("can't be set larger than 200"));
}

// OFFSET //////////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_offset_skips_leading_buckets() {
    let (engine, _clock) = engine_with_data().await;

    // 4 buckets x 3 series = 12 groups; skipping 3 drops the newest bucket.
    let values = engine.create_metrics_query().offset(3).interval().await.unwrap();
    assert_eq!(values.len(), 9);
    assert_eq!(values[0].timestamp.timestamp_millis(), 2 * BUCKET_MS);
}

#[tokio::test]
async fn test_query_offset_beyond_data_is_empty() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine
        .create_metrics_query()
        .offset(100_000)
        .interval()
        .await
        .unwrap();
    assert!(values.is_empty());
}

// INTERVAL ////////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_default_interval_spacing() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine.create_metrics_query().interval().await.unwrap();
    assert_eq!(values.len(), 12);
    assert_descending_with_spacing(&values, DEFAULT_INTERVAL_SECS * 1000);
}

#[tokio::test]
async fn test_query_custom_interval_spacing() {
    let (engine, _clock) = engine_with_data().await;

    // 3-minute points in 5-minute buckets: 12 buckets x 3 series.
    let values = engine.create_metrics_query().interval_secs(300).await.unwrap();
    assert_eq!(values.len(), 36);
    assert_descending_with_spacing(&values, 300 * 1000);
}

// WHERE REPORTER //////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_reporter_filter_matches_all_rows() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine
        .create_metrics_query()
        .reporter(REPORTER_ID)
        .interval()
        .await
        .unwrap();
    assert_eq!(values.len(), 12);
    for value in &values {
        assert_eq!(value.reporter, REPORTER_ID);
    }
}

#[tokio::test]
async fn test_query_unknown_reporter_is_empty() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine
        .create_metrics_query()
        .reporter("notExist")
        .interval()
        .await
        .unwrap();
    assert!(values.is_empty());

    let values = engine
        .create_metrics_query()
        .reporter("notExist")
        .interval_secs(300)
        .await
        .unwrap();
    assert!(values.is_empty());
}

// WHERE NAME //////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_name_filter() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine
        .create_metrics_query()
        .name(names::ACTIVITY_INSTANCE_START)
        .interval()
        .await
        .unwrap();
    // One group per 15-minute bucket; 5 points x 3 marks each.
    assert_eq!(values.len(), 4);
    for value in &values {
        assert_eq!(value.name, names::ACTIVITY_INSTANCE_START);
        assert_eq!(value.value, 15);
    }
}

#[tokio::test]
async fn test_query_unknown_name_is_empty() {
    let (engine, _clock) = engine_with_data().await;

    let values = engine
        .create_metrics_query()
        .name("notExist")
        .interval()
        .await
        .unwrap();
    assert!(values.is_empty());
}

// DATE RANGE //////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_query_start_date_is_inclusive() {
    use chrono::TimeZone;
    let (engine, _clock) = engine_with_data().await;

    let start = chrono::Utc.timestamp_millis_opt(2 * BUCKET_MS).single().unwrap();
    let values = engine
        .create_metrics_query()
        .start_date(start)
        .interval()
        .await
        .unwrap();
    // Buckets at 30 and 45 minutes, 3 series each.
    assert_eq!(values.len(), 6);
    for value in &values {
        assert!(value.timestamp.timestamp_millis() >= 2 * BUCKET_MS);
    }
}

#[tokio::test]
async fn test_query_end_date_is_exclusive() {
    use chrono::TimeZone;
    let (engine, _clock) = engine_with_data().await;

    let end = chrono::Utc.timestamp_millis_opt(2 * BUCKET_MS).single().unwrap();
    let values = engine
        .create_metrics_query()
        .end_date(end)
        .interval()
        .await
        .unwrap();
    // Buckets at 0 and 15 minutes only; the point exactly at 30 minutes is
    // excluded.
    assert_eq!(values.len(), 6);
    for value in &values {
        assert!(value.timestamp.timestamp_millis() < 2 * BUCKET_MS);
    }
}

#[tokio::test]
async fn test_query_start_and_end_date() {
    use chrono::TimeZone;
    let (engine, _clock) = engine_with_data().await;

    let start = chrono::Utc.timestamp_millis_opt(BUCKET_MS).single().unwrap();
    let end = chrono::Utc.timestamp_millis_opt(2 * BUCKET_MS).single().unwrap();
    let values = engine
        .create_metrics_query()
        .start_date(start)
        .end_date(end)
        .interval()
        .await
        .unwrap();
    // One 15-minute bucket, 3 series.
    assert_eq!(values.len(), 3);
}

// VALUE ///////////////////////////////////////////////////////////////////

#[tokio::test]
async fn test_sum_equals_interval_total_under_same_filter() {
    use chrono::TimeZone;
    let (engine, _clock) = engine_with_data().await;

    let start = chrono::Utc.timestamp_millis_opt(BUCKET_MS).single().unwrap();
    let end = chrono::Utc.timestamp_millis_opt(2 * BUCKET_MS).single().unwrap();

    let query = engine
        .create_metrics_query()
        .name(names::ACTIVITY_INSTANCE_START)
        .start_date(start)
        .end_date(end);

    let values = query.interval().await.unwrap();
    let sum = query.sum().await.unwrap();

    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, sum);
}

/// Four process-start events per 3-minute sub-interval across one 15-minute
/// bucket, re-aggregated at 5 minutes: three buckets whose values total the
/// filter's sum.
#[tokio::test]
async fn test_custom_interval_rebuckets_and_preserves_sum() {
    use chrono::TimeZone;
    let clock = ManualClock::new();
    let engine = metrics_engine(&clock);

    for point in 0..5 {
        clock.set_millis(BUCKET_MS + point * 3 * MINUTE_MS);
        engine
            .meters()
            .mark_times(names::ACTIVITY_INSTANCE_START, 4);
        engine.report_metrics_now().await.unwrap();
    }

    let start = chrono::Utc.timestamp_millis_opt(BUCKET_MS).single().unwrap();
    let end = chrono::Utc.timestamp_millis_opt(2 * BUCKET_MS).single().unwrap();
    let query = engine
        .create_metrics_query()
        .name(names::ACTIVITY_INSTANCE_START)
        .start_date(start)
        .end_date(end);

    let values = query.interval_secs(300).await.unwrap();
    let sum = query.sum().await.unwrap();

    // Points at 15/18, 21/24, 27 minutes land in buckets 15, 20, 25.
    assert_eq!(values.len(), 3);
    assert_eq!(values[0].value, 4);
    assert_eq!(values[1].value, 8);
    assert_eq!(values[2].value, 8);
    assert_eq!(values.iter().map(|v| v.value).sum::<i64>(), sum);
    assert_eq!(sum, 20);
}

// NOT LOGGED METRICS //////////////////////////////////////////////////////

#[tokio::test]
async fn test_unflushed_counters_merge_into_latest_bucket() {
    let (engine, clock) = engine_with_data().await;
    // Clock sits at the last generation point (57 minutes), inside the
    // newest 15-minute bucket.
    assert_eq!(clock.now().timestamp_millis(), 57 * MINUTE_MS);

    let before = engine
        .create_metrics_query()
        .name(names::ACTIVITY_INSTANCE_START)
        .limit(1)
        .interval()
        .await
        .unwrap()[0]
        .value;

    // Mark without any reporter activation.
    engine
        .meters()
        .mark_times(names::ACTIVITY_INSTANCE_START, 3);

    // Visible through the name-filtered query...
    let after = engine
        .create_metrics_query()
        .name(names::ACTIVITY_INSTANCE_START)
        .limit(1)
        .interval()
        .await
        .unwrap()[0]
        .value;
    assert_eq!(after, before + 3);

    // ...and through the unfiltered one.
    let all = engine.create_metrics_query().interval().await.unwrap();
    let newest_bucket = all[0].timestamp;
    let merged = all
        .iter()
        .find(|v| v.timestamp == newest_bucket && v.name == names::ACTIVITY_INSTANCE_START)
        .expect("series present in newest bucket");
    assert_eq!(merged.value, before + 3);

    // The query never mutates the registry.
    assert_eq!(
        engine
            .meters()
            .meter(names::ACTIVITY_INSTANCE_START)
            .unwrap()
            .get(),
        3
    );
}

#[tokio::test]
async fn test_live_merge_respects_reporter_filter() {
    let (engine, _clock) = engine_with_data().await;

    engine.meters().mark_times(names::JOB_SUCCESSFUL, 5);

    // A foreign reporter filter excludes this engine's live counters too.
    let values = engine
        .create_metrics_query()
        .reporter("someone-else")
        .interval()
        .await
        .unwrap();
    assert!(values.is_empty());
}

// ADMINISTRATIVE RESET ////////////////////////////////////////////////////

#[tokio::test]
async fn test_delete_metrics() {
    let (engine, _clock) = engine_with_data().await;

    // A different reporter's rows are untouched by a scoped delete.
    let removed = engine.delete_metrics(Some("notExist")).await.unwrap();
    assert_eq!(removed, 0);

    let removed = engine.delete_metrics(Some(REPORTER_ID)).await.unwrap();
    assert_eq!(removed, 60); // 20 points x 3 series

    let values = engine.create_metrics_query().interval().await.unwrap();
    assert!(values.is_empty());

    // Live counters survive an unconditional reset.
    engine.meters().mark(names::JOB_SUCCESSFUL);
    engine.delete_metrics(None).await.unwrap();
    assert_eq!(engine.meters().meter(names::JOB_SUCCESSFUL).unwrap().get(), 1);
}
