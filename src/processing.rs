//! Message parsing and validation for LoRa sensor telemetry.
//!
//! Raw device text of the form `ID:<device>, <field>:<value>, ...` is turned
//! into a validated [`Reading`]: field names are mapped through a configurable
//! alias table and numeric values are checked against configured range bounds.
//! Validation is all-or-nothing — a single out-of-range field rejects the
//! entire message and no Reading is produced.

use crate::config::RangeBounds;
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, warn};
use std::collections::HashMap;

/// A single parsed field value. Values that fail numeric parsing keep their
/// original string form and are exempt from range checks.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Mapping from canonical field name to value. Keys are unique; iteration
/// order mirrors the order fields appeared in the message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapping {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. A duplicate name overwrites the value but keeps the
    /// original position.
    pub fn insert(&mut self, name: String, value: FieldValue) {
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            existing.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One validated, timestamped, device-attributed set of sensor fields.
///
/// A Reading either passed validation in full or was never constructed;
/// there is no partially-valid Reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Instant parsing completed, UTC, truncated to whole seconds. Never
    /// carried in the message itself.
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub fields: FieldMapping,
}

/// Which range bound a numeric field violated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundViolation {
    BelowMinimum(f64),
    AboveMaximum(f64),
}

impl std::fmt::Display for BoundViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundViolation::BelowMinimum(min) => write!(f, "below minimum {}", min),
            BoundViolation::AboveMaximum(max) => write!(f, "above maximum {}", max),
        }
    }
}

/// Parse/validation failures. None of these are retryable — the message is
/// gone once the cycle ends.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty or invalid message")]
    MalformedInput,

    #[error("message does not contain expected device ID {expected}")]
    DeviceMismatch { expected: String },

    #[error("message format does not match expected pattern: {message}")]
    FormatMismatch { message: String },

    #[error("{field} value {value} {bound}")]
    OutOfRange {
        field: String,
        value: f64,
        bound: BoundViolation,
    },
}

fn is_field_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_field_value_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '+' || c == '-'
}

/// Consume a non-empty run of `pred` characters, returning the remainder.
fn scan_token(s: &str, pred: fn(char) -> bool) -> Option<&str> {
    let end = s.find(|c| !pred(c)).unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[end..])
    }
}

/// Check the whole trimmed text against the wire grammar:
/// `ID:<deviceId>(,<ws*><fieldName>:<fieldValue>)+` with nothing trailing.
fn matches_wire_grammar(trimmed: &str, device_id: &str) -> bool {
    let rest = match trimmed.strip_prefix("ID:") {
        Some(r) => r,
        None => return false,
    };
    let mut rest = match rest.strip_prefix(device_id) {
        Some(r) => r,
        None => return false,
    };

    let mut groups = 0usize;
    while let Some(after_comma) = rest.strip_prefix(',') {
        let after_ws = after_comma.trim_start();
        let after_name = match scan_token(after_ws, is_field_name_char) {
            Some(r) => r,
            None => return false,
        };
        let after_colon = match after_name.strip_prefix(':') {
            Some(r) => r,
            None => return false,
        };
        rest = match scan_token(after_colon, is_field_value_char) {
            Some(r) => r,
            None => return false,
        };
        groups += 1;
    }

    groups >= 1 && rest.is_empty()
}

/// Split the message body into raw (field, value) string pairs.
///
/// Pieces without a colon are silently dropped; this lenience is deliberate
/// and mirrors the permissive token grammar.
fn extract_field_pairs<'a>(trimmed: &'a str, device_id: &str) -> Vec<(&'a str, &'a str)> {
    let body = trimmed
        .strip_prefix("ID:")
        .and_then(|r| r.strip_prefix(device_id))
        .unwrap_or(trimmed);
    let body = body.trim_start_matches(',').trim_start();

    body.split(',')
        .filter_map(|pair| {
            let (field, value) = pair.split_once(':')?;
            Some((field.trim(), value.trim()))
        })
        .collect()
}

/// Parse raw device text into a validated [`Reading`].
///
/// Steps, in order: non-empty check, device-marker substring check, whole-text
/// grammar check, lenient pair extraction, then per-field alias mapping and
/// range validation. The timestamp is taken when parsing completes.
pub fn parse_reading(
    raw: &str,
    expected_device_id: &str,
    aliases: &HashMap<String, String>,
    ranges: &HashMap<String, RangeBounds>,
) -> Result<Reading, ParseError> {
    debug!(
        "Processing message from {}: {}",
        expected_device_id,
        crate::logutil::escape_log(raw)
    );

    if raw.trim().is_empty() {
        return Err(ParseError::MalformedInput);
    }

    let marker = format!("ID:{}", expected_device_id);
    if !raw.contains(&marker) {
        return Err(ParseError::DeviceMismatch {
            expected: expected_device_id.to_string(),
        });
    }

    let trimmed = raw.trim();
    if !matches_wire_grammar(trimmed, expected_device_id) {
        return Err(ParseError::FormatMismatch {
            message: crate::logutil::escape_log(trimmed),
        });
    }

    let mut fields = FieldMapping::new();
    for (raw_name, raw_value) in extract_field_pairs(trimmed, expected_device_id) {
        let canonical = aliases
            .get(raw_name)
            .map(String::as_str)
            .unwrap_or(raw_name);

        let value = match raw_value.parse::<f64>() {
            Err(_) => FieldValue::Text(raw_value.to_string()),
            Ok(numeric) => {
                if let Some(bounds) = ranges.get(canonical) {
                    if let Some(min) = bounds.min {
                        if numeric < min {
                            warn!("Value {} for {} below minimum {}", numeric, canonical, min);
                            return Err(ParseError::OutOfRange {
                                field: canonical.to_string(),
                                value: numeric,
                                bound: BoundViolation::BelowMinimum(min),
                            });
                        }
                    }
                    if let Some(max) = bounds.max {
                        if numeric > max {
                            warn!("Value {} for {} above maximum {}", numeric, canonical, max);
                            return Err(ParseError::OutOfRange {
                                field: canonical.to_string(),
                                value: numeric,
                                bound: BoundViolation::AboveMaximum(max),
                            });
                        }
                    }
                }
                FieldValue::Number(numeric)
            }
        };

        fields.insert(canonical.to_string(), value);
    }

    Ok(Reading {
        timestamp: Utc::now().trunc_subsecs(0),
        device_id: expected_device_id.to_string(),
        fields,
    })
}

/// Format a reading for the daily log file:
/// `[YYYY-MM-DDTHH:MM:SS] ID:<device>, <field>:<value>, ...`
///
/// Pure function of the reading; formatting the same reading twice yields
/// identical text.
pub fn format_log_line(reading: &Reading) -> String {
    let fields = reading
        .fields
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "[{}] ID:{}, {}",
        reading.timestamp.format("%Y-%m-%dT%H:%M:%S"),
        reading.device_id,
        fields
    )
}

/// Basic per-reading statistics, logged after each successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    pub total_fields: usize,
    pub numeric_fields: usize,
    pub field_names: Vec<String>,
}

pub fn field_stats(reading: &Reading) -> FieldStats {
    let numeric_fields = reading
        .fields
        .iter()
        .filter(|(_, v)| v.as_number().is_some())
        .count();
    FieldStats {
        total_fields: reading.fields.len(),
        numeric_fields,
        field_names: reading.fields.iter().map(|(k, _)| k.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_aliases() -> HashMap<String, String> {
        HashMap::new()
    }

    fn no_ranges() -> HashMap<String, RangeBounds> {
        HashMap::new()
    }

    #[test]
    fn numeric_and_text_fields_are_typed() {
        let reading = parse_reading(
            "ID:Device5, a:1, b:2.5, c:text",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .expect("parses");

        assert_eq!(reading.fields.len(), 3);
        assert_eq!(reading.fields.get("a"), Some(&FieldValue::Number(1.0)));
        assert_eq!(reading.fields.get("b"), Some(&FieldValue::Number(2.5)));
        assert_eq!(
            reading.fields.get("c"),
            Some(&FieldValue::Text("text".to_string()))
        );
    }

    #[test]
    fn empty_message_is_malformed() {
        assert_eq!(
            parse_reading("", "Device5", &no_aliases(), &no_ranges()),
            Err(ParseError::MalformedInput)
        );
        assert_eq!(
            parse_reading("   ", "Device5", &no_aliases(), &no_ranges()),
            Err(ParseError::MalformedInput)
        );
    }

    #[test]
    fn wrong_device_marker_is_rejected() {
        let err = parse_reading("ID:Device7, a:1", "Device5", &no_aliases(), &no_ranges())
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::DeviceMismatch {
                expected: "Device5".to_string()
            }
        );
    }

    #[test]
    fn foreign_message_containing_marker_is_not_accepted() {
        // "ID:Device55" contains the substring "ID:Device5", so the marker
        // check passes, but the anchored grammar does not; the message must
        // not produce a Reading.
        let err = parse_reading(
            "ID:Device55, a:1",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::FormatMismatch { .. }));
    }

    #[test]
    fn message_without_fields_fails_grammar() {
        let err =
            parse_reading("ID:Device5", "Device5", &no_aliases(), &no_ranges()).unwrap_err();
        assert!(matches!(err, ParseError::FormatMismatch { .. }));
    }

    #[test]
    fn trailing_garbage_fails_grammar() {
        let err = parse_reading(
            "ID:Device5, a:1 extra",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::FormatMismatch { .. }));
    }

    #[test]
    fn empty_field_value_fails_grammar() {
        let err = parse_reading(
            "ID:Device5, a:1, b:",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::FormatMismatch { .. }));
    }

    #[test]
    fn value_charset_allows_sign_dot_and_underscore() {
        let reading = parse_reading(
            "ID:Device5, dx:-0.5, dy:+1.25, unit:m_s",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .expect("parses");
        assert_eq!(reading.fields.get("dx"), Some(&FieldValue::Number(-0.5)));
        assert_eq!(reading.fields.get("dy"), Some(&FieldValue::Number(1.25)));
        assert_eq!(
            reading.fields.get("unit"),
            Some(&FieldValue::Text("m_s".to_string()))
        );
    }

    #[test]
    fn below_minimum_rejects_whole_reading() {
        let mut ranges = no_ranges();
        ranges.insert(
            "Temp".to_string(),
            RangeBounds {
                min: Some(-40.0),
                max: Some(85.0),
            },
        );

        let err = parse_reading(
            "ID:Device5, ok:1, Temp:-55.0",
            "Device5",
            &no_aliases(),
            &ranges,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::OutOfRange {
                field: "Temp".to_string(),
                value: -55.0,
                bound: BoundViolation::BelowMinimum(-40.0),
            }
        );
    }

    #[test]
    fn above_maximum_rejects_whole_reading() {
        let mut ranges = no_ranges();
        ranges.insert(
            "Temp".to_string(),
            RangeBounds {
                min: None,
                max: Some(85.0),
            },
        );

        let err = parse_reading("ID:Device5, Temp:90", "Device5", &no_aliases(), &ranges)
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::OutOfRange {
                field: "Temp".to_string(),
                value: 90.0,
                bound: BoundViolation::AboveMaximum(85.0),
            }
        );
    }

    #[test]
    fn text_values_skip_range_checks() {
        let mut ranges = no_ranges();
        ranges.insert(
            "status".to_string(),
            RangeBounds {
                min: Some(0.0),
                max: Some(1.0),
            },
        );

        let reading = parse_reading("ID:Device5, status:armed", "Device5", &no_aliases(), &ranges)
            .expect("text value bypasses range check");
        assert_eq!(
            reading.fields.get("status"),
            Some(&FieldValue::Text("armed".to_string()))
        );
    }

    #[test]
    fn aliases_apply_to_present_names_and_pass_others_through() {
        let mut aliases = no_aliases();
        aliases.insert("Max_A".to_string(), "maxAcceleration_m/s2".to_string());

        let reading = parse_reading(
            "ID:Device5, Max_A:2.50, Temp:25.5",
            "Device5",
            &aliases,
            &no_ranges(),
        )
        .expect("parses");

        assert_eq!(
            reading.fields.get("maxAcceleration_m/s2"),
            Some(&FieldValue::Number(2.5))
        );
        assert_eq!(reading.fields.get("Temp"), Some(&FieldValue::Number(25.5)));
        assert_eq!(reading.fields.get("Max_A"), None);
    }

    #[test]
    fn range_lookup_uses_canonical_name() {
        let mut aliases = no_aliases();
        aliases.insert("T".to_string(), "Temp".to_string());
        let mut ranges = no_ranges();
        ranges.insert(
            "Temp".to_string(),
            RangeBounds {
                min: None,
                max: Some(85.0),
            },
        );

        let err =
            parse_reading("ID:Device5, T:90", "Device5", &aliases, &ranges).unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { ref field, .. } if field == "Temp"));
    }

    #[test]
    fn timestamp_is_whole_seconds() {
        let reading =
            parse_reading("ID:Device5, a:1", "Device5", &no_aliases(), &no_ranges()).unwrap();
        assert_eq!(reading.timestamp.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn log_line_formatting_is_idempotent() {
        let reading = parse_reading(
            "ID:Device5, Max_A:2.50, Temp:25.5",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap();

        let first = format_log_line(&reading);
        let second = format_log_line(&reading);
        assert_eq!(first, second);
        assert!(first.ends_with("ID:Device5, Max_A:2.5, Temp:25.5"));
        assert!(first.starts_with('['));
    }

    #[test]
    fn field_stats_counts_numeric_fields() {
        let reading = parse_reading(
            "ID:Device5, a:1, b:2.5, c:text",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap();
        let stats = field_stats(&reading);
        assert_eq!(stats.total_fields, 3);
        assert_eq!(stats.numeric_fields, 2);
        assert_eq!(stats.field_names, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_field_keeps_first_position_last_value() {
        let reading = parse_reading(
            "ID:Device5, a:1, b:2, a:3",
            "Device5",
            &no_aliases(),
            &no_ranges(),
        )
        .unwrap();
        assert_eq!(reading.fields.len(), 2);
        assert_eq!(reading.fields.get("a"), Some(&FieldValue::Number(3.0)));
        let names: Vec<_> = reading.fields.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
