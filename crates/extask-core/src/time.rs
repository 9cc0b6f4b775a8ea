//! Engine date-time format.
//!
//! The engine writes timestamps as `2013-01-23T14:42:45.000+0200`: millisecond
//! precision and an offset without a colon, which is not RFC 3339.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serializer};

/// `chrono` format string for engine timestamps.
pub const ENGINE_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

pub fn parse(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_str(s, ENGINE_DATE_TIME_FORMAT)
}

pub fn format(dt: &DateTime<FixedOffset>) -> String {
    dt.format(ENGINE_DATE_TIME_FORMAT).to_string()
}

/// Serde adapter for optional engine timestamps; empty strings read as `None`.
pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<FixedOffset>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&format(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => parse(s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}
