use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

pub fn now_ms() -> EpochMs {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Project a timestamp reported by the test-management server onto the
/// recommendation server's clock.
pub fn adjust(ts: EpochMs, drift_ms: i64) -> EpochMs {
    ts + drift_ms
}

/// Parse an execution timestamp as the test-management server reports it.
///
/// Accepts RFC 3339 (`2024-03-01T10:00:00.000Z`, `...+02:00`), the colon-less
/// offset form (`...+0000`), and a bare local form which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<EpochMs> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Parse an HTTP `Date` response header (IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(raw: &str) -> Option<EpochMs> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// RFC 3339 rendering with millisecond precision, `Z` suffix.
pub fn format_iso(ms: EpochMs) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Calendar day (UTC) of a timestamp, `YYYY-MM-DD`.
pub fn format_date(ms: EpochMs) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_with_zero_drift_is_identity() {
        for t in [0, 1, 1_700_000_000_000, -5] {
            assert_eq!(adjust(t, 0), t);
        }
        assert_eq!(adjust(1_000, 250), 1_250);
        assert_eq!(adjust(1_000, -250), 750);
    }

    #[test]
    fn parses_server_timestamp_variants() {
        let expected = 1_709_287_200_000; // 2024-03-01T10:00:00Z
        assert_eq!(parse_timestamp("2024-03-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00.000+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00.000+0200"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn parses_http_date_header() {
        assert_eq!(
            parse_http_date("Fri, 01 Mar 2024 10:00:00 GMT"),
            Some(1_709_287_200_000)
        );
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn format_iso_round_trips_through_parse() {
        let ms = 1_709_287_200_123;
        assert_eq!(format_iso(ms), "2024-03-01T10:00:00.123Z");
        assert_eq!(parse_timestamp(&format_iso(ms)), Some(ms));
    }

    #[test]
    fn format_date_is_the_utc_day() {
        assert_eq!(format_date(1_709_287_200_123), "2024-03-01");
        assert_eq!(format_date(parse_timestamp("2024-03-01T23:30:00-02:00").unwrap()), "2024-03-02");
    }
}
