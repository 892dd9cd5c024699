//! Append-only error log for per-item failures.
//!
//! Console output stays limited to progress and counts; every failure that a
//! loop swallows lands here instead, one line each, with a per-kind summary
//! appended at the end of the run.

use crate::transport::TransportError;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

pub const DEFAULT_LOG_FILE: &str = "bulk-import-errors.log";

const DETAIL_STRING_LIMIT: usize = 500;
const DETAIL_LINE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    HierarchyCreationFailed,
    TestRunCreationFailed,
    VersionNotApproved,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HierarchyCreationFailed => "HIERARCHY_CREATION_FAILED",
            ErrorKind::TestRunCreationFailed => "TEST_RUN_CREATION_FAILED",
            ErrorKind::VersionNotApproved => "VERSION_NOT_APPROVED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<String>,
    pub details: Option<Value>,
}

impl ErrorEntry {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            message: message.into(),
            context,
            details: details.map(truncate_strings),
        }
    }

    /// A container or leaf-holder could not be created.
    pub fn hierarchy(item_type: &str, item_name: &str, err: &dyn Failure) -> Self {
        Self::new(
            ErrorKind::HierarchyCreationFailed,
            format!("Failed to create {item_type}"),
            Some(format!("{item_type}: {item_name}")),
            Some(with_failure(
                json!({ "itemType": item_type, "itemName": item_name }),
                err,
            )),
        )
    }

    pub fn test_run(test_name: &str, suite_name: &str, err: &dyn Failure) -> Self {
        Self::new(
            ErrorKind::TestRunCreationFailed,
            "Failed to create test run",
            Some(format!("Test: {test_name}, Suite: {suite_name}")),
            Some(with_failure(
                json!({ "testName": test_name, "suiteName": suite_name }),
                err,
            )),
        )
    }

    /// A status could not be applied to a run.
    pub fn version(
        test_name: &str,
        test_run_id: i64,
        version_id: Option<i64>,
        err: &dyn Failure,
    ) -> Self {
        Self::new(
            ErrorKind::VersionNotApproved,
            "Test case version not approved",
            Some(format!("Test: {test_name} (Run ID: {test_run_id})")),
            Some(json!({
                "testRunId": test_run_id,
                "versionId": version_id.unwrap_or(0),
                "errorMessage": err.to_string(),
                "statusCode": err.status_code(),
            })),
        )
    }

    /// Single-line rendering as written to the log file.
    pub fn to_line(&self) -> String {
        let mut line = format!("[{}] {}: {}", self.timestamp, self.kind, self.message);
        if let Some(ctx) = &self.context {
            line.push_str(&format!(" | Context: {ctx}"));
        }
        if let Some(details) = &self.details {
            let s = details.to_string();
            if s.chars().count() < DETAIL_LINE_LIMIT {
                line.push_str(&format!(" | Details: {s}"));
            } else {
                let head: String = s.chars().take(DETAIL_LINE_LIMIT).collect();
                line.push_str(&format!(" | Details: {head}... (see full log)"));
            }
        }
        line
    }
}

/// An error worth recording: its message plus whatever the server said.
pub trait Failure: std::fmt::Display {
    fn status_code(&self) -> Option<u16> {
        None
    }

    fn response_body(&self) -> Option<&str> {
        None
    }
}

impl Failure for TransportError {
    fn status_code(&self) -> Option<u16> {
        self.http_status()
    }

    fn response_body(&self) -> Option<&str> {
        match self {
            TransportError::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

fn with_failure(mut details: Value, err: &dyn Failure) -> Value {
    details["errorMessage"] = json!(err.to_string());
    details["statusCode"] = json!(err.status_code());
    if let Some(body) = err.response_body() {
        details["errorData"] = json!(body);
    }
    details
}

fn truncate_strings(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > DETAIL_STRING_LIMIT => {
            let head: String = s.chars().take(DETAIL_STRING_LIMIT).collect();
            Value::String(format!("{head}... (truncated)"))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(truncate_strings).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Receives per-item failures. Callers never read it back.
pub trait ErrorSink: Send + Sync {
    fn record(&self, entry: ErrorEntry);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
}

/// File-backed [`ErrorSink`]. The file is cleared when the log is opened.
pub struct ErrorLog {
    path: PathBuf,
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorLog {
    pub fn create(output_dir: &Path, file_name: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(file_name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(Self {
            path,
            entries: Mutex::new(vec![]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_errors(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn summary(&self) -> ErrorSummary {
        let entries = self.lock();
        let mut by_kind = BTreeMap::new();
        for e in entries.iter() {
            *by_kind.entry(e.kind).or_insert(0) += 1;
        }
        ErrorSummary {
            total: entries.len(),
            by_kind,
        }
    }

    /// Append the per-kind breakdown. Does nothing when no error was recorded.
    pub fn write_summary(&self) {
        let summary = self.summary();
        if summary.total == 0 {
            return;
        }
        let rule = "=".repeat(80);
        let mut text = format!("\n{rule}\nERROR SUMMARY\n{rule}\nTotal errors: {}\n\nBreakdown by type:\n", summary.total);
        for (kind, count) in &summary.by_kind {
            text.push_str(&format!("  - {kind}: {count}\n"));
        }
        text.push_str(&format!("{rule}\n"));
        self.append(&text);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ErrorEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, text: &str) {
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(text.as_bytes()));
        if let Err(e) = res {
            warn!("could not write error log {}: {e}", self.path.display());
        }
    }
}

impl ErrorSink for ErrorLog {
    fn record(&self, entry: ErrorEntry) {
        self.append(&format!("{}\n", entry.to_line()));
        self.lock().push(entry);
    }
}
