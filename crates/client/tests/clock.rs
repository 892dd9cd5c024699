mod common;

use async_trait::async_trait;
use common::FakeTransport;
use qbridge_client::{estimate, estimate_drift, ServerClock, SyncEndpointClock, TransportClock};
use qbridge_core::{materialize, EpochMs, EventStatus, RawLog};
use serde_json::json;
use std::sync::Arc;

struct FixedClock(Option<EpochMs>);

#[async_trait]
impl ServerClock for FixedClock {
    async fn server_time(&self) -> Option<EpochMs> {
        self.0
    }
}

const T: EpochMs = 1_700_000_000_000;

#[tokio::test]
async fn drift_is_recommendation_minus_test_management() {
    let est = estimate(&FixedClock(Some(T)), &FixedClock(Some(T + 50))).await;
    assert_eq!(est.drift_ms, 50);
    assert_eq!(est.test_management.server_time, Some(T));
    assert_eq!(
        estimate_drift(&FixedClock(Some(T + 120)), &FixedClock(Some(T))).await,
        -120
    );
}

#[tokio::test]
async fn missing_sample_means_no_drift() {
    assert_eq!(estimate_drift(&FixedClock(None), &FixedClock(Some(T + 50))).await, 0);
    assert_eq!(estimate_drift(&FixedClock(Some(T)), &FixedClock(None)).await, 0);
    assert_eq!(estimate_drift(&FixedClock(None), &FixedClock(None)).await, 0);
}

#[tokio::test]
async fn unavailable_server_leaves_events_untouched() {
    let drift = estimate_drift(&FixedClock(None), &FixedClock(Some(T + 50))).await;
    let logs = vec![RawLog {
        name: "Login works".into(),
        external_id: "TC-1".into(),
        status: Some("Passed".into()),
        started: Some("2024-01-15T10:00:00Z".into()),
        ended: Some("2024-01-15T10:00:05Z".into()),
        ..Default::default()
    }];
    let events = materialize(&logs, drift);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].start, 1_705_312_800_000);
    assert_eq!(events[0].end, 1_705_312_805_000);
    assert_eq!(events[0].status, EventStatus::Passed);
}

#[tokio::test]
async fn transport_clock_reads_the_date_header() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get("/projects", &[("pageSize", "1")], json!([]));
    fake.set_date(T);
    assert_eq!(TransportClock::new(fake).server_time().await, Some(T));
}

#[tokio::test]
async fn transport_clock_failure_is_no_sample() {
    let fake = Arc::new(FakeTransport::new());
    assert_eq!(TransportClock::new(fake.clone()).server_time().await, None);

    // A response without a Date header is no sample either.
    fake.on_get("/projects", &[("pageSize", "1")], json!([]));
    assert_eq!(TransportClock::new(fake).server_time().await, None);
}

#[tokio::test]
async fn unconfigured_sync_endpoint_is_no_sample() {
    let clock = SyncEndpointClock::new(None, Some("token".into()));
    assert_eq!(clock.server_time().await, None);
}
