#![allow(dead_code)]

use async_trait::async_trait;
use qbridge_client::error_log::{ErrorEntry, ErrorSink};
use qbridge_client::transport::{ApiResponse, Params, Transport, TransportError};
use qbridge_core::EpochMs;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Scripted transport for tests. GETs answer from a table keyed by path and
/// query; anything unscripted is a 404. POSTs are recorded and succeed with
/// fresh ids unless the (collection, name) pair was marked to fail.
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    gets: HashMap<String, Value>,
    failing_gets: HashSet<String>,
    failing_posts: HashSet<(String, String)>,
    get_log: Vec<String>,
    posts: Vec<RecordedPost>,
    next_id: i64,
    date_ms: Option<EpochMs>,
}

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Value,
    pub id: Option<i64>,
}

impl RecordedPost {
    pub fn collection(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.body["name"].as_str().unwrap_or("")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn key(path: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let q: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", q.join("&"))
}

fn not_found(method: &str, path: &str) -> TransportError {
    TransportError::Status {
        method: method.into(),
        path: path.into(),
        status: 404,
        body: "not found".into(),
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.inner.lock().unwrap().next_id = 1000;
        fake
    }

    pub fn on_get(&self, path: &str, params: &[(&str, &str)], data: Value) {
        let params: Vec<(&str, String)> = params.iter().map(|(k, v)| (*k, v.to_string())).collect();
        self.inner.lock().unwrap().gets.insert(key(path, &params), data);
    }

    pub fn fail_get(&self, path: &str, params: &[(&str, &str)]) {
        let params: Vec<(&str, String)> = params.iter().map(|(k, v)| (*k, v.to_string())).collect();
        self.inner.lock().unwrap().failing_gets.insert(key(path, &params));
    }

    /// Make creating `name` in `collection` (e.g. "test-suites") fail.
    pub fn fail_post(&self, collection: &str, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_posts
            .insert((collection.to_string(), name.to_string()));
    }

    pub fn set_date(&self, ms: EpochMs) {
        self.inner.lock().unwrap().date_ms = Some(ms);
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn get_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get_log
            .iter()
            .filter(|k| k.split('?').next() == Some(path))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str, params: &Params<'_>) -> Result<ApiResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let k = key(path, params);
        inner.get_log.push(k.clone());
        if inner.failing_gets.contains(&k) {
            return Err(TransportError::Status {
                method: "GET".into(),
                path: path.into(),
                status: 500,
                body: "boom".into(),
            });
        }
        match inner.gets.get(&k) {
            Some(data) => Ok(ApiResponse {
                status: 200,
                date_ms: inner.date_ms,
                data: data.clone(),
            }),
            None => Err(not_found("GET", path)),
        }
    }

    async fn post(
        &self,
        path: &str,
        params: &Params<'_>,
        body: &Value,
    ) -> Result<ApiResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let mut record = RecordedPost {
            path: path.to_string(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            body: body.clone(),
            id: None,
        };
        let failing = (record.collection().to_string(), record.name().to_string());
        if inner.failing_posts.contains(&failing) {
            inner.posts.push(record);
            return Err(TransportError::Status {
                method: "POST".into(),
                path: path.into(),
                status: 400,
                body: "rejected".into(),
            });
        }
        inner.next_id += 1;
        let id = inner.next_id;
        record.id = Some(id);
        let data = if record.collection() == "test-runs" {
            json!({ "id": id, "test_case_version_id": id + 50_000 })
        } else {
            json!({ "id": id })
        };
        inner.posts.push(record);
        Ok(ApiResponse {
            status: 201,
            date_ms: inner.date_ms,
            data,
        })
    }
}

/// Error sink that keeps everything in memory.
#[derive(Default)]
pub struct CollectSink {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl CollectSink {
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl ErrorSink for CollectSink {
    fn record(&self, entry: ErrorEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
