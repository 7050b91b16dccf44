//! Row-mapping helpers
//!
//! Timestamps are stored as RFC3339 text and list-valued profile fields as
//! JSON array text. These functions are the only place either encoding is
//! known; the models themselves hold typed values.

use chrono::{DateTime, Utc};
use tracing::warn;

/// Parse a datetime string (RFC3339 format) or return current time
pub fn parse_datetime_or_now(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a nullable RFC3339 column; unparseable text reads as NULL
pub fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Encode a list column as JSON array text
pub fn encode_string_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a list column stored as JSON array text
///
/// NULL, empty and malformed values all decode to an empty list.
pub fn decode_string_list(raw: Option<&str>) -> Vec<String> {
    match raw.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(text) => serde_json::from_str::<Vec<String>>(text).unwrap_or_else(|e| {
            warn!("Ignoring malformed list column {:?}: {}", text, e);
            Vec::new()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_codec() {
        let items = vec!["Machine learning".to_string(), "Robotics, \"soft\"".to_string()];
        let encoded = encode_string_list(&items);
        assert_eq!(decode_string_list(Some(&encoded)), items);
        assert_eq!(encode_string_list(&[]), "[]");
    }

    #[test]
    fn test_decode_tolerates_bad_input() {
        assert!(decode_string_list(None).is_empty());
        assert!(decode_string_list(Some("")).is_empty());
        assert!(decode_string_list(Some("   ")).is_empty());
        assert!(decode_string_list(Some("not json")).is_empty());
        assert!(decode_string_list(Some("{\"a\": 1}")).is_empty());
    }

    #[test]
    fn test_parse_datetime_or_now() {
        let parsed = parse_datetime_or_now("2024-01-01T12:00:00Z");
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T12:00:00+00:00");

        let now_before = Utc::now();
        let parsed = parse_datetime_or_now("invalid");
        let now_after = Utc::now();
        assert!(parsed >= now_before && parsed <= now_after);
    }

    #[test]
    fn test_parse_optional_datetime() {
        assert!(parse_optional_datetime(None).is_none());
        assert!(parse_optional_datetime(Some("garbage".into())).is_none());
        assert!(parse_optional_datetime(Some("2030-06-01T00:00:00+00:00".into())).is_some());
    }
}
