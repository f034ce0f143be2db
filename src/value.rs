//! Property-list values as plain structured data.
//!
//! Everything read from a plist (package manager reports, system_profiler
//! output, preference files) is converted into [`PlistValue`] once, at the
//! boundary. The rest of the crate never touches `plist::Value` directly.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    String(String),
    Data(Vec<u8>),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Null,
    Array(Vec<PlistValue>),
    Dictionary(BTreeMap<String, PlistValue>),
}

impl PlistValue {
    /// Parse an XML or binary plist from bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, plist::Error> {
        plist::Value::from_reader(Cursor::new(bytes)).map(Self::from)
    }

    pub fn from_file(path: &Path) -> Result<Self, plist::Error> {
        plist::Value::from_file(path).map(Self::from)
    }

    /// An empty dictionary, the stand-in for a report that could not be read.
    pub fn empty_dict() -> Self {
        Self::Dictionary(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&PlistValue> {
        match self {
            Self::Dictionary(dict) => dict.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Real(r) => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::String(s) => parse_date_string(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PlistValue>> {
        match self {
            Self::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Array elements, or an empty slice for anything else (including absence).
    pub fn items(value: Option<&PlistValue>) -> &[PlistValue] {
        value.and_then(PlistValue::as_array).unwrap_or(&[])
    }

    /// Convert to JSON. Dates become RFC 3339 strings in UTC and data
    /// becomes base64 text; every other variant maps onto its JSON twin.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Data(bytes) => Value::String(general_purpose::STANDARD.encode(bytes)),
            Self::Integer(i) => Value::from(*i),
            Self::Real(r) => serde_json::Number::from_f64(*r)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Date(d) => Value::String(d.to_rfc3339()),
            Self::Null => Value::Null,
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Dictionary(dict) => Value::Object(
                dict.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<plist::Value> for PlistValue {
    fn from(value: plist::Value) -> Self {
        match value {
            plist::Value::String(s) => Self::String(s),
            plist::Value::Data(bytes) => Self::Data(bytes),
            plist::Value::Integer(i) => match i.as_signed() {
                Some(signed) => Self::Integer(signed),
                None => i
                    .as_unsigned()
                    .map(|u| Self::Real(u as f64))
                    .unwrap_or(Self::Null),
            },
            plist::Value::Real(r) => Self::Real(r),
            plist::Value::Boolean(b) => Self::Boolean(b),
            plist::Value::Date(d) => Self::Date(DateTime::<Utc>::from(SystemTime::from(d))),
            plist::Value::Uid(uid) => Self::Integer(uid.get() as i64),
            plist::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            plist::Value::Dictionary(dict) => Self::Dictionary(
                dict.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
            _ => Self::Null,
        }
    }
}

impl From<&str> for PlistValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for PlistValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Dates that tools print as text, e.g. `2024-03-01 09:15:00 +0000`.
fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z"))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>ManifestName</key>
    <string>site_default</string>
    <key>AvailableDiskSpace</key>
    <integer>104857600</integer>
    <key>StartTime</key>
    <date>2024-03-01T09:15:00Z</date>
    <key>Blob</key>
    <data>dGVzdA==</data>
    <key>Errors</key>
    <array>
        <string>boom</string>
    </array>
</dict>
</plist>"#;

    #[test]
    fn parses_xml_plist_into_tagged_values() {
        let value = PlistValue::from_slice(REPORT.as_bytes()).unwrap();

        assert_eq!(
            value.get("ManifestName").and_then(PlistValue::as_str),
            Some("site_default")
        );
        assert_eq!(
            value.get("AvailableDiskSpace").and_then(PlistValue::as_i64),
            Some(104857600)
        );
        assert_eq!(
            value.get("StartTime").and_then(PlistValue::as_date),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap())
        );
        assert_eq!(PlistValue::items(value.get("Errors")).len(), 1);
        assert!(PlistValue::items(value.get("Warnings")).is_empty());
    }

    #[test]
    fn json_conversion_normalizes_dates_and_data() {
        let value = PlistValue::from_slice(REPORT.as_bytes()).unwrap();
        let json = value.to_json();

        assert_eq!(json["StartTime"], "2024-03-01T09:15:00+00:00");
        assert_eq!(json["Blob"], "dGVzdA==");
        assert_eq!(json["AvailableDiskSpace"], 104857600);
        assert_eq!(json["Errors"][0], "boom");
    }

    #[test]
    fn text_dates_with_offsets_are_read_as_utc() {
        let value = PlistValue::String("2024-03-01 10:15:00 +0100".to_string());
        assert_eq!(
            value.as_date(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap())
        );
    }
}
