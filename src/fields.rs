//! Canonical metadata fields and the resolved tag set handed to backends

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MetadataError, Result};

/// Backend-neutral metadata field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Make,
    Model,
    Software,
    Encoder,
    CreationTool,
    CreationTime,
}

pub type FieldMap = BTreeMap<MetadataField, String>;

impl MetadataField {
    pub const ALL: [MetadataField; 6] = [
        MetadataField::Make,
        MetadataField::Model,
        MetadataField::Software,
        MetadataField::Encoder,
        MetadataField::CreationTool,
        MetadataField::CreationTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Make => "make",
            MetadataField::Model => "model",
            MetadataField::Software => "software",
            MetadataField::Encoder => "encoder",
            MetadataField::CreationTool => "creation_tool",
            MetadataField::CreationTime => "creation_time",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Fields that point back at a specific device or app
    pub fn is_identifying(&self) -> bool {
        matches!(
            self,
            MetadataField::Make
                | MetadataField::Model
                | MetadataField::Software
                | MetadataField::CreationTool
        )
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataField {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
            .ok_or_else(|| MetadataError::InvalidInput(format!("Unknown metadata field: {}", s)))
    }
}

// ============================================================================
// Creation date
// ============================================================================

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y:%m:%d %H:%M:%S",
];

/// Creation timestamp, always held in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CreationDate(DateTime<Utc>);

impl CreationDate {
    /// Accepts `YYYY-MM-DD HH:MM:SS`, ISO 8601 / RFC 3339, EXIF
    /// `YYYY:MM:DD HH:MM:SS` and a bare `YYYY-MM-DD` (midnight UTC)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self(dt.with_timezone(&Utc)));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self(naive.and_utc()));
            }
        }
        if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Ok(Self(naive.and_utc()));
        }

        Err(MetadataError::InvalidInput(format!(
            "Invalid creation date '{}': expected YYYY-MM-DD HH:MM:SS",
            s
        )))
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// `2024-05-01T12:30:00.000000Z`, as ffmpeg writes `creation_time`
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    /// `2024-05-01T12:30:00Z`
    pub fn to_rfc3339_seconds(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// `2024:05:01 12:30:00`, the EXIF/QuickTime date convention
    pub fn to_exif(&self) -> String {
        self.0.format("%Y:%m:%d %H:%M:%S").to_string()
    }
}

impl fmt::Display for CreationDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

impl FromStr for CreationDate {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CreationDate {
    type Error = MetadataError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CreationDate> for String {
    fn from(date: CreationDate) -> Self {
        date.to_string()
    }
}

// ============================================================================
// Metadata set
// ============================================================================

/// Resolved tags for one write: text fields plus an optional creation date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSet {
    /// Text-valued fields (never contains `creation_time`)
    pub fields: FieldMap,
    pub creation_time: Option<CreationDate>,
}

impl MetadataSet {
    /// Split a profile's attribute map into text fields and a parsed date
    pub fn from_attributes(attributes: &FieldMap) -> Result<Self> {
        let mut set = MetadataSet::default();
        for (field, value) in attributes {
            match field {
                MetadataField::CreationTime => {
                    set.creation_time = Some(CreationDate::parse(value)?);
                }
                _ => {
                    set.fields.insert(*field, value.clone());
                }
            }
        }
        Ok(set)
    }

    pub fn with_creation_time(mut self, date: CreationDate) -> Self {
        self.creation_time = Some(date);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.creation_time.is_none()
    }

    pub fn requested_fields(&self) -> Vec<MetadataField> {
        let mut fields: Vec<MetadataField> = self.fields.keys().copied().collect();
        if self.creation_time.is_some() {
            fields.push(MetadataField::CreationTime);
        }
        fields
    }

    /// Flattened view with the date rendered as `YYYY-MM-DD HH:MM:SS`
    pub fn to_field_map(&self) -> FieldMap {
        let mut map = self.fields.clone();
        if let Some(date) = self.creation_time {
            map.insert(MetadataField::CreationTime, date.to_string());
        }
        map
    }

    /// The subset of this set that `writable` can carry, and what was left out
    pub fn partition(&self, writable: &[MetadataField]) -> (FieldMap, Vec<MetadataField>) {
        let mut written = FieldMap::new();
        let mut skipped = Vec::new();
        for (field, value) in self.to_field_map() {
            if writable.contains(&field) {
                written.insert(field, value);
            } else {
                skipped.push(field);
            }
        }
        (written, skipped)
    }
}
