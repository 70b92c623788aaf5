//! The normalized event shape
//!
//! Every input converts whatever it observes into an [`Event`]. From that
//! point on the pipeline only ever moves events around by value: filters take
//! one and hand back a (possibly different) one, the buffering engine clones
//! an event once per extra sink, and outputs receive borrowed batches.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "timestamp": "2024-01-01T00:00:00Z",
//!   "providerName": "orders-service",
//!   "level": "Warning",
//!   "payload": { "msg": "slow query", "ms": 812 },
//!   "context": { "correlationId": "abc-123" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ordered key/value payload
///
/// Backed by `serde_json::Map` with `preserve_order`, so keys serialize in
/// the order the producer inserted them.
pub type Payload = serde_json::Map<String, Value>;

/// Cross-cutting metadata carried alongside the payload
pub type Context = BTreeMap<String, String>;

/// Event severity
///
/// Variants are declared in ascending order so `Ord` matches severity:
/// `Verbose < Informational < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    /// Fine-grained diagnostics
    Verbose,
    /// Normal operation
    #[default]
    Informational,
    /// Something unexpected that did not fail
    Warning,
    /// An operation failed
    Error,
    /// The producer cannot continue
    Critical,
}

impl Level {
    /// All levels, lowest first
    pub const ALL: [Level; 5] = [
        Level::Verbose,
        Level::Informational,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Canonical name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Informational => "Informational",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Critical => "Critical",
        }
    }

    /// Numeric ordinal (Verbose = 0 .. Critical = 4)
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Level for a numeric ordinal, if in range
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no [`Level`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level '{0}' (expected verbose, informational, warning, error, critical or 0-4)")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u64>() {
            return Self::from_ordinal(n).ok_or_else(|| ParseLevelError(s.to_string()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "verbose" | "trace" | "debug" => Ok(Level::Verbose),
            "informational" | "info" => Ok(Level::Informational),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" | "fatal" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl Visitor<'_> for LevelVisitor {
            type Value = Level;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a level name or an ordinal between 0 and 4")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Level, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Level, E> {
                Level::from_ordinal(v)
                    .ok_or_else(|| E::custom(format!("level ordinal {v} out of range")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Level, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(Level::from_ordinal)
                    .ok_or_else(|| E::custom(format!("level ordinal {v} out of range")))
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

/// A normalized telemetry event
///
/// Events are plain values. A filter that wants to change one builds a new
/// event (usually via the `with_*` builders) instead of mutating a shared
/// copy, so what one sink sees can never leak into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// When the event occurred; ingestion time if the producer gave none
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Originating subsystem (logger, trace source, counter set, ...)
    pub provider_name: String,
    /// Severity
    #[serde(default)]
    pub level: Level,
    /// Ordered payload
    #[serde(default)]
    pub payload: Payload,
    /// Correlation ids and similar metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,
}

impl Event {
    /// Create an event stamped with the current time and an empty payload
    pub fn new(provider_name: impl Into<String>, level: Level) -> Self {
        Self {
            timestamp: Utc::now(),
            provider_name: provider_name.into(),
            level,
            payload: Payload::new(),
            context: Context::new(),
        }
    }

    /// Replace the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Append a payload field (replaces the value if the key exists,
    /// keeping its original position)
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Add or replace a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Top-level payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Payload field addressed by a dotted path, e.g. `"http.status"`
    pub fn field_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.payload.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Context entry
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    // ==========================================================================
    // Level
    // ==========================================================================

    #[test]
    fn level_ordering_matches_severity() {
        assert!(Level::Verbose < Level::Informational);
        assert!(Level::Informational < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
    }

    #[test]
    fn level_parses_names_aliases_and_ordinals() {
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Critical".parse::<Level>().unwrap(), Level::Critical);
        assert_eq!("0".parse::<Level>().unwrap(), Level::Verbose);
        assert_eq!("4".parse::<Level>().unwrap(), Level::Critical);
        assert!("5".parse::<Level>().is_err());
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn level_deserializes_from_string_or_number() {
        let by_name: Level = serde_json::from_value(json!("Error")).unwrap();
        let by_ordinal: Level = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(by_name, Level::Error);
        assert_eq!(by_ordinal, Level::Error);
        assert!(serde_json::from_value::<Level>(json!(9)).is_err());
        assert!(serde_json::from_value::<Level>(json!(-1)).is_err());
    }

    // ==========================================================================
    // Event
    // ==========================================================================

    #[test]
    fn payload_keeps_insertion_order() {
        let event = Event::new("x", Level::Informational)
            .with_field("zeta", 1)
            .with_field("alpha", 2)
            .with_field("mid", 3);

        let keys: Vec<&str> = event.payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let json = serde_json::to_string(&event.payload).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn serializes_camel_case_and_skips_empty_context() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = Event::new("orders", Level::Warning)
            .with_timestamp(ts)
            .with_field("msg", "a");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["providerName"], "orders");
        assert_eq!(value["level"], "Warning");
        assert_eq!(value["payload"]["msg"], "a");
        assert!(value.get("context").is_none());
    }

    #[test]
    fn deserialize_fills_defaults() {
        let before = Utc::now();
        let event: Event = serde_json::from_str(r#"{"providerName":"x"}"#).unwrap();
        assert_eq!(event.level, Level::Informational);
        assert!(event.payload.is_empty());
        assert!(event.timestamp >= before);
    }

    #[test]
    fn deserialize_requires_provider_name() {
        let result = serde_json::from_str::<Event>(r#"{"level":"Error"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let event = Event::new("svc", Level::Error)
            .with_timestamp(ts)
            .with_field("b", json!({"nested": true}))
            .with_field("a", 1.5)
            .with_context("correlationId", "abc");

        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn field_path_walks_nested_objects() {
        let event = Event::new("x", Level::Informational)
            .with_field("http", json!({"status": 503, "route": {"name": "orders"}}));

        assert_eq!(event.field_path("http.status"), Some(&json!(503)));
        assert_eq!(event.field_path("http.route.name"), Some(&json!("orders")));
        assert_eq!(event.field_path("http.missing"), None);
        assert_eq!(event.field_path("http.status.deeper"), None);
    }

    #[test]
    fn with_field_on_existing_key_keeps_position() {
        let event = Event::new("x", Level::Informational)
            .with_field("a", 1)
            .with_field("b", 2)
            .with_field("a", 3);
        let keys: Vec<&str> = event.payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(event.field("a"), Some(&json!(3)));
    }
}
