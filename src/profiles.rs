//! Device Profiles
//!
//! A profile is a named set of metadata values that mimics the tags a given
//! device writes into its own recordings.
//!
//! ## Sources
//!
//! - **Built-in**: a fixed table of current phones, built once at startup
//! - **Custom**: a JSON object read from disk for a single operation
//!
//! ## Custom profile format
//!
//! ```json
//! {
//!   "make": "Apple",
//!   "model": "iPhone 15 Pro",
//!   "software": "iOS 17.1",
//!   "creation_time": "2023-11-02 18:20:00"
//! }
//! ```
//!
//! Keys must be canonical field names; missing keys are simply not written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{MetadataError, Result};
use crate::fields::{CreationDate, FieldMap, MetadataField};

// ============================================================================
// Device Profile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub attributes: FieldMap,
}

impl DeviceProfile {
    /// Build a profile, dropping blank values and rejecting empty results
    pub fn new(name: impl Into<String>, attributes: FieldMap) -> Result<Self> {
        let name = name.into();
        let attributes: FieldMap = attributes
            .into_iter()
            .map(|(k, v)| (k, v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        if attributes.is_empty() {
            return Err(MetadataError::InvalidProfileFormat(format!(
                "Profile '{}' has no non-empty metadata values",
                name
            )));
        }
        if let Some(date) = attributes.get(&MetadataField::CreationTime) {
            CreationDate::parse(date).map_err(|_| {
                MetadataError::InvalidProfileFormat(format!(
                    "Profile '{}' has an invalid creation_time: {}",
                    name, date
                ))
            })?;
        }

        Ok(Self { name, attributes })
    }

    pub fn get(&self, field: MetadataField) -> Option<&str> {
        self.attributes.get(&field).map(String::as_str)
    }

    /// Human-readable preview, one `Field: value` line per attribute
    pub fn summary(&self) -> String {
        self.attributes
            .iter()
            .map(|(field, value)| format!("{}: {}", capitalize(field.as_str()), value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Profile Store
// ============================================================================

/// Immutable table of built-in profiles, in display order
#[derive(Debug, Clone)]
pub struct ProfileStore {
    profiles: Vec<DeviceProfile>,
}

impl ProfileStore {
    /// Store holding the built-in device table
    pub fn builtin() -> Self {
        let profiles = BUILTIN_PROFILES
            .iter()
            .map(|(name, make, model, software, encoder, creation_tool)| DeviceProfile {
                name: name.to_string(),
                attributes: [
                    (MetadataField::Make, *make),
                    (MetadataField::Model, *model),
                    (MetadataField::Software, *software),
                    (MetadataField::Encoder, *encoder),
                    (MetadataField::CreationTool, *creation_tool),
                ]
                .into_iter()
                .map(|(field, value)| (field, value.to_string()))
                .collect(),
            })
            .collect();

        Self { profiles }
    }

    /// Store over an explicit profile list; names must be unique
    pub fn from_profiles(profiles: Vec<DeviceProfile>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(MetadataError::InvalidProfileFormat(format!(
                    "Duplicate profile name: {}",
                    profile.name
                )));
            }
            if profile.attributes.is_empty() {
                return Err(MetadataError::InvalidProfileFormat(format!(
                    "Profile '{}' is empty",
                    profile.name
                )));
            }
        }
        Ok(Self { profiles })
    }

    pub fn list_profiles(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn get_profile(&self, name: &str) -> Result<&DeviceProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| MetadataError::ProfileNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::builtin()
    }
}

/// (name, make, model, software, encoder, creation_tool)
const BUILTIN_PROFILES: &[(&str, &str, &str, &str, &str, &str)] = &[
    ("iPhone 14 Pro", "Apple", "iPhone 14 Pro", "iOS 16.0", "HEVC (H.265)", "iPhone 14 Pro back triple camera 6.86mm f/1.78"),
    ("Samsung Galaxy S24 Ultra", "Samsung", "SM-S928B", "Android 14", "HEVC (H.265)", "Samsung Galaxy S24 Ultra"),
    ("Google Pixel 9 Pro", "Google", "Pixel 9 Pro", "Android 15", "HEVC (H.265)", "Google Pixel 9 Pro"),
    ("Samsung Galaxy Z Fold 6", "Samsung", "SM-F956B", "Android 14", "HEVC (H.265)", "Samsung Galaxy Z Fold 6"),
    ("OnePlus Open", "OnePlus", "CPH2517", "Android 14", "HEVC (H.265)", "OnePlus Open"),
    ("Xiaomi 15", "Xiaomi", "2405CPH5DC", "Android 15", "HEVC (H.265)", "Xiaomi 15"),
    ("Huawei Mate 60 Pro", "Huawei", "DCO-AL00", "HarmonyOS 4.0", "HEVC (H.265)", "Huawei Mate 60 Pro"),
    ("Sony Xperia 5 VI", "Sony", "XQ-DQ74", "Android 14", "HEVC (H.265)", "Sony Xperia 5 VI"),
    ("Oppo Find N3", "Oppo", "CPH2511", "Android 13", "HEVC (H.265)", "Oppo Find N3"),
    ("Vivo X100 Pro", "Vivo", "V2303A", "Android 14", "HEVC (H.265)", "Vivo X100 Pro"),
];

// ============================================================================
// Custom profile file I/O
// ============================================================================

/// Load custom device profile from a JSON file
pub fn load_custom_profile(path: &Path) -> Result<DeviceProfile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MetadataError::InvalidProfileFormat(format!(
            "Failed to read custom profile {}: {}",
            path.display(),
            e
        ))
    })?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Custom Profile".to_string());

    let profile = parse_custom_profile(&name, &content)?;
    debug!("Loaded custom profile '{}' with {} fields", profile.name, profile.attributes.len());
    Ok(profile)
}

/// Parse the JSON body of a custom profile
pub fn parse_custom_profile(name: &str, json: &str) -> Result<DeviceProfile> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| MetadataError::InvalidProfileFormat(format!("JSON parse error: {}", e)))?;

    let mut attributes = FieldMap::new();
    for (key, value) in raw {
        let field = MetadataField::from_name(&key).ok_or_else(|| {
            MetadataError::InvalidProfileFormat(format!("Unrecognized metadata field: {}", key))
        })?;
        let text = value.as_str().ok_or_else(|| {
            MetadataError::InvalidProfileFormat(format!("Value of '{}' must be a string", key))
        })?;
        attributes.insert(field, text.to_string());
    }

    DeviceProfile::new(name, attributes)
}

/// Save device profile attributes to a JSON file
pub fn save_profile(profile: &DeviceProfile, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&profile.attributes)
        .map_err(|e| MetadataError::InvalidProfileFormat(e.to_string()))?;
    std::fs::write(path, json)?;
    info!("Saved profile '{}' to {}", profile.name, path.display());
    Ok(())
}
