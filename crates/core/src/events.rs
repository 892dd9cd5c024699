use crate::model::{EventStatus, NormalizedEvent};
use crate::time::{adjust, parse_timestamp};

/// One execution log as read from the test-management server, before normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawLog {
    pub name: String,
    pub external_id: String,
    pub status: Option<String>,
    pub started: Option<String>,
    pub ended: Option<String>,
    pub user_email: Option<String>,
}

/// Map a free-form execution status onto the event vocabulary.
///
/// Substring match, case-insensitive: "pass", then "fail", then "skip"/"block".
/// Unrecognised names count as passed; a missing status counts as skipped.
pub fn map_status(raw: Option<&str>) -> EventStatus {
    let Some(raw) = raw else {
        return EventStatus::Skipped;
    };
    let lower = raw.to_lowercase();
    if lower.contains("pass") {
        EventStatus::Passed
    } else if lower.contains("fail") {
        EventStatus::Failed
    } else if lower.contains("skip") || lower.contains("block") {
        EventStatus::Skipped
    } else {
        EventStatus::Passed
    }
}

fn normalize(log: &RawLog, drift_ms: i64) -> Option<NormalizedEvent> {
    let start = parse_timestamp(log.started.as_deref()?)?;
    let end = parse_timestamp(log.ended.as_deref()?)?;
    if start > end {
        return None;
    }
    Some(NormalizedEvent {
        name: log.name.clone(),
        external_id: log.external_id.clone(),
        start: adjust(start, drift_ms),
        end: adjust(end, drift_ms),
        status: map_status(log.status.as_deref()),
    })
}

/// Convert raw logs into drift-adjusted events sorted by start.
///
/// Logs lacking either timestamp (or with one that does not parse, or that
/// ends before it starts) cannot be placed on the timeline and are dropped.
pub fn materialize(logs: &[RawLog], drift_ms: i64) -> Vec<NormalizedEvent> {
    let mut events: Vec<NormalizedEvent> = logs.iter().filter_map(|l| normalize(l, drift_ms)).collect();
    events.sort_by_key(|e| e.start);
    events
}

/// Concatenate and stable-sort by start.
pub fn merge_events(existing: Vec<NormalizedEvent>, incoming: Vec<NormalizedEvent>) -> Vec<NormalizedEvent> {
    let mut merged = existing;
    merged.extend(incoming);
    merged.sort_by_key(|e| e.start);
    merged
}
