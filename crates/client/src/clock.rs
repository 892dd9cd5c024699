//! One-shot clock offset between the test-management server and the
//! recommendation server.
//!
//! Each server is sampled once against the local clock. If either sample is
//! missing the drift is 0 and timestamps pass through unchanged.

use crate::transport::Transport;
use async_trait::async_trait;
use qbridge_core::{now_ms, parse_http_date, Config, EpochMs};
use reqwest::{header, Client};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// A server whose current time can be sampled.
#[async_trait]
pub trait ServerClock: Send + Sync {
    /// Server time in epoch milliseconds, or `None` if it could not be read.
    async fn server_time(&self) -> Option<EpochMs>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub local_time: EpochMs,
    pub server_time: Option<EpochMs>,
}

pub async fn sample(clock: &dyn ServerClock) -> ClockSample {
    let local_time = now_ms();
    ClockSample {
        local_time,
        server_time: clock.server_time().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftEstimate {
    pub test_management: ClockSample,
    pub recommendation: ClockSample,
    /// Add to a test-management timestamp to place it on the recommendation clock.
    pub drift_ms: i64,
}

/// Drift between two samples: `recommendation - test_management`, or 0 when
/// either is missing.
pub fn drift_between(test_management: &ClockSample, recommendation: &ClockSample) -> i64 {
    match (test_management.server_time, recommendation.server_time) {
        (Some(a), Some(b)) => b - a,
        _ => 0,
    }
}

pub async fn estimate(
    test_management: &dyn ServerClock,
    recommendation: &dyn ServerClock,
) -> DriftEstimate {
    let a = sample(test_management).await;
    let b = sample(recommendation).await;
    let drift_ms = drift_between(&a, &b);
    if a.server_time.is_none() || b.server_time.is_none() {
        warn!("could not calculate clock drift, using clockDriftMs = 0");
    } else {
        info!("clock drift {drift_ms}ms");
    }
    DriftEstimate {
        test_management: a,
        recommendation: b,
        drift_ms,
    }
}

/// Never fails; see [`drift_between`].
pub async fn estimate_drift(test_management: &dyn ServerClock, recommendation: &dyn ServerClock) -> i64 {
    estimate(test_management, recommendation).await.drift_ms
}

/// Reads the `Date` header of a minimal API request.
pub struct TransportClock {
    transport: Arc<dyn Transport>,
}

impl TransportClock {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ServerClock for TransportClock {
    async fn server_time(&self) -> Option<EpochMs> {
        match self
            .transport
            .get("/projects", &[("pageSize", "1".to_string())])
            .await
        {
            Ok(resp) => {
                if resp.date_ms.is_none() {
                    warn!("no Date header in test-management response");
                }
                resp.date_ms
            }
            Err(e) => {
                warn!("failed to get test-management server time: {e}");
                None
            }
        }
    }
}

/// Server time from a `/clock/sync` response.
///
/// `data.slDriftMs` (local minus server) wins, then `data.slServerTime`,
/// then the `Date` header.
pub fn server_time_from_sync(local_ms: EpochMs, body: &Value, date_ms: Option<EpochMs>) -> Option<EpochMs> {
    let data = body.get("data");
    let number = |key: &str| data.and_then(|d| d.get(key)).and_then(Value::as_f64);
    if let Some(drift) = number("slDriftMs") {
        return Some(local_ms - drift.round() as i64);
    }
    if let Some(server) = number("slServerTime") {
        return Some(server.round() as i64);
    }
    date_ms
}

/// Samples the recommendation server's `/clock/sync` endpoint.
pub struct SyncEndpointClock {
    client: Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl SyncEndpointClock {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(SYNC_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            token,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.sealights_base_url(), cfg.sealights_token().map(str::to_string))
    }

    async fn fetch(&self, base: &str, local_ms: EpochMs) -> Result<Option<EpochMs>, reqwest::Error> {
        let url = format!("{}/clock/sync", base.trim_end_matches('/'));
        let mut req = self
            .client
            .get(&url)
            .query(&[("time", local_ms.to_string())])
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?.error_for_status()?;
        let date_ms = resp
            .headers()
            .get(header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(server_time_from_sync(local_ms, &body, date_ms))
    }
}

#[async_trait]
impl ServerClock for SyncEndpointClock {
    async fn server_time(&self) -> Option<EpochMs> {
        let Some(base) = self.base_url.as_deref() else {
            debug!("recommendation server not configured; no clock sample");
            return None;
        };
        match self.fetch(base, now_ms()).await {
            Ok(Some(t)) => Some(t),
            Ok(None) => {
                warn!("no server time in /clock/sync response");
                None
            }
            Err(e) => {
                warn!("failed to get recommendation server time: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_body_precedence() {
        let local = 10_000;
        let both = json!({ "data": { "slDriftMs": 250, "slServerTime": 1 } });
        assert_eq!(server_time_from_sync(local, &both, Some(5)), Some(9_750));
        let server_only = json!({ "data": { "slServerTime": 12_345 } });
        assert_eq!(server_time_from_sync(local, &server_only, Some(5)), Some(12_345));
        assert_eq!(server_time_from_sync(local, &json!({ "data": {} }), Some(5)), Some(5));
        assert_eq!(server_time_from_sync(local, &Value::Null, None), None);
    }

    #[test]
    fn drift_is_b_minus_a_or_zero() {
        let s = |t: Option<EpochMs>| ClockSample {
            local_time: 1_000,
            server_time: t,
        };
        assert_eq!(drift_between(&s(Some(1_000)), &s(Some(1_050))), 50);
        assert_eq!(drift_between(&s(Some(1_050)), &s(Some(1_000))), -50);
        assert_eq!(drift_between(&s(None), &s(Some(1_050))), 0);
        assert_eq!(drift_between(&s(Some(1_000)), &s(None)), 0);
    }

    #[tokio::test]
    async fn unconfigured_sync_endpoint_yields_no_sample() {
        let clock = SyncEndpointClock::new(None, None);
        assert_eq!(clock.server_time().await, None);
    }
}
