//! Container Metadata Reading
//!
//! Reads tags back from a video file for preview and verification, no matter
//! which backend wrote them.
//!
//! ## Backend Priority
//!
//! 1. **ExifTool** (primary) - sees QuickTime, Keys, ItemList and XMP groups
//! 2. **FFprobe** (fallback) - container-level `format.tags`
//!
//! Raw tag names differ per tool (`QuickTime:Make`, `com.apple.quicktime.make`,
//! `make`, ...). They are folded into [`MetadataField`]s so callers can
//! compare against a profile directly.
//!
//! ## Example
//!
//! ```rust,ignore
//! use video_meta::{MetadataReader, Toolchain};
//!
//! let reader = MetadataReader::new(Toolchain::detect());
//! let meta = reader.read_metadata(Path::new("clip.mp4"))?;
//! println!("Device: {:?} {:?}", meta.get(MetadataField::Make), meta.get(MetadataField::Model));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::ToolCommand;
use crate::error::{MetadataError, Result};
use crate::fields::{CreationDate, FieldMap, MetadataField};
use crate::format::{validate_input_file, ContainerFormat};
use crate::tools::Toolchain;

// ============================================================================
// Core Metadata Types
// ============================================================================

/// Metadata read back from a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Source file path
    pub source_file: String,

    /// Basic file system facts
    pub file_info: FileInfo,

    /// Canonical fields recognized among the raw tags
    pub fields: FieldMap,

    /// Tool used to read the tags
    pub backend: ReaderBackend,

    /// Every tag the tool reported, by its own name
    pub raw_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_size: u64,
    /// Extension in upper case, e.g. "MP4"
    pub file_format: String,
    pub mime_type: String,
    /// File creation time (RFC 3339), where the filesystem records one
    pub date_created: Option<String>,
    /// Last modified timestamp (RFC 3339)
    pub date_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReaderBackend {
    ExifTool,
    FFprobe,
}

impl ContainerMetadata {
    pub fn get(&self, field: MetadataField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// True if make, model, software or creation tool is still present
    pub fn has_identifying_fields(&self) -> bool {
        self.fields.keys().any(MetadataField::is_identifying)
    }
}

// ============================================================================
// Reader
// ============================================================================

pub struct MetadataReader {
    exiftool: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl MetadataReader {
    pub fn new(toolchain: &Toolchain) -> Self {
        Self {
            exiftool: toolchain.exiftool.clone(),
            ffprobe: toolchain.ffprobe.clone(),
        }
    }

    /// Read metadata from a supported video file; never modifies it
    pub fn read_metadata(&self, path: &Path) -> Result<ContainerMetadata> {
        let format = validate_input_file(path)?;
        let file_info = file_info(path, format)?;

        if let Some(exiftool) = &self.exiftool {
            match read_with_exiftool(exiftool, path) {
                Ok(raw_tags) => return Ok(build(path, file_info, ReaderBackend::ExifTool, raw_tags)),
                Err(e) => debug!("ExifTool read failed, trying ffprobe: {}", e),
            }
        }

        let ffprobe = self.ffprobe.as_ref().ok_or_else(|| {
            MetadataError::BackendUnavailable("Neither exiftool nor ffprobe is available".to_string())
        })?;
        let raw_tags = read_with_ffprobe(ffprobe, path)?;
        Ok(build(path, file_info, ReaderBackend::FFprobe, raw_tags))
    }
}

fn build(
    path: &Path,
    file_info: FileInfo,
    backend: ReaderBackend,
    raw_tags: BTreeMap<String, String>,
) -> ContainerMetadata {
    ContainerMetadata {
        source_file: path.to_string_lossy().to_string(),
        file_info,
        fields: canonical_fields(&raw_tags),
        backend,
        raw_tags,
    }
}

fn file_info(path: &Path, format: ContainerFormat) -> Result<FileInfo> {
    let metadata = std::fs::metadata(path)?;

    Ok(FileInfo {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_size: metadata.len(),
        file_format: format.extension().to_uppercase(),
        mime_type: format.mime_type().to_string(),
        date_created: metadata.created().ok().map(rfc3339),
        date_modified: metadata.modified().ok().map(rfc3339),
    })
}

fn rfc3339(time: std::time::SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339()
}

// ============================================================================
// ExifTool Backend (Primary)
// ============================================================================

fn read_with_exiftool(exiftool: &Path, path: &Path) -> Result<BTreeMap<String, String>> {
    let parsed: Vec<HashMap<String, serde_json::Value>> = ToolCommand::new(exiftool)
        .args(&["-j", "-G"])
        .output(path)
        .execute_json()?;

    let tags = parsed
        .into_iter()
        .next()
        .ok_or_else(|| MetadataError::ExternalToolFailure("No metadata found".to_string()))?;

    Ok(tags
        .into_iter()
        .filter(|(k, _)| k != "SourceFile")
        .map(|(k, v)| (k, value_to_string(&v)))
        .collect())
}

// ============================================================================
// FFprobe Backend (Fallback)
// ============================================================================

fn read_with_ffprobe(ffprobe: &Path, path: &Path) -> Result<BTreeMap<String, String>> {
    let parsed: serde_json::Value = ToolCommand::new(ffprobe)
        .args(&["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .output(path)
        .execute_json()?;

    let mut tags = BTreeMap::new();
    if let Some(format_tags) = parsed
        .get("format")
        .and_then(|f| f.get("tags"))
        .and_then(|t| t.as_object())
    {
        for (k, v) in format_tags {
            tags.insert(k.clone(), value_to_string(v));
        }
    }
    if let Some(name) = parsed
        .get("format")
        .and_then(|f| f.get("format_name"))
        .and_then(|n| n.as_str())
    {
        tags.insert("format_name".to_string(), name.to_string());
    }

    Ok(tags)
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v.as_str() {
        Some(s) => s.to_string(),
        None => v.to_string().trim_matches('"').to_string(),
    }
}

// ============================================================================
// Tag Name Normalization
// ============================================================================

/// Map a tool-specific tag name onto a canonical field
///
/// Group prefixes (`QuickTime:`) and reverse-DNS prefixes
/// (`com.apple.quicktime.`) are dropped, then case and punctuation folded.
pub fn canonical_field(tag: &str) -> Option<MetadataField> {
    let group = tag.split(':').next().unwrap_or_default();
    if tag.contains(':') && matches!(group, "File" | "ExifTool" | "Composite") {
        return None;
    }

    let name = tag.rsplit(':').next().unwrap_or(tag);
    let name = name.rsplit('.').next().unwrap_or(name);
    let folded: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match folded.as_str() {
        "make" => Some(MetadataField::Make),
        "model" => Some(MetadataField::Model),
        "software" => Some(MetadataField::Software),
        "encoder" => Some(MetadataField::Encoder),
        "creationtool" | "creatortool" => Some(MetadataField::CreationTool),
        "creationtime" | "creationdate" | "createdate" | "contentcreatedate" | "date" => {
            Some(MetadataField::CreationTime)
        }
        _ => None,
    }
}

/// Raw tag names per field, most trusted first
///
/// Bare keys (what ffmpeg writes and ffprobe reports) and the tags the
/// exiftool backend writes outrank reverse-DNS keys and legacy atoms, which
/// are often left over from the recording device.
fn tag_priority(field: MetadataField) -> &'static [&'static str] {
    match field {
        MetadataField::Make => &["make", "QuickTime:Make", "com.apple.quicktime.make"],
        MetadataField::Model => &["model", "QuickTime:Model", "com.apple.quicktime.model"],
        MetadataField::Software => &["software", "QuickTime:Software", "com.apple.quicktime.software"],
        MetadataField::Encoder => &["encoder", "QuickTime:Encoder"],
        MetadataField::CreationTool => &["creation_tool", "XMP:CreatorTool"],
        MetadataField::CreationTime => &[
            "creation_time",
            "QuickTime:CreateDate",
            "QuickTime:CreationDate",
            "date",
            "com.apple.quicktime.creationdate",
        ],
    }
}

/// Rank of `tag` for `field`; unlisted aliases rank after every listed one
fn rank(field: MetadataField, tag: &str) -> usize {
    let listed = tag_priority(field);
    listed
        .iter()
        .position(|name| name.eq_ignore_ascii_case(tag))
        .unwrap_or(listed.len())
}

/// Fold raw tags into canonical fields, picking the best-ranked usable value
pub fn canonical_fields(raw_tags: &BTreeMap<String, String>) -> FieldMap {
    let mut best: HashMap<MetadataField, (usize, String)> = HashMap::new();

    for (tag, value) in raw_tags {
        let Some(field) = canonical_field(tag) else {
            continue;
        };
        let Some(value) = usable_value(field, value) else {
            continue;
        };

        let rank = rank(field, tag);
        match best.get(&field) {
            Some((current, _)) if *current <= rank => {}
            _ => {
                best.insert(field, (rank, value));
            }
        }
    }

    best.into_iter().map(|(field, (_, value))| (field, value)).collect()
}

/// Trimmed value, with dates normalized; `None` for empty or unset
fn usable_value(field: MetadataField, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if field != MetadataField::CreationTime {
        return Some(value.to_string());
    }
    if is_zero_date(value) {
        return None;
    }
    Some(
        CreationDate::parse(value)
            .map(|d| d.to_string())
            .unwrap_or_else(|_| value.to_string()),
    )
}

/// Placeholder dates tools report for "unset"
fn is_zero_date(value: &str) -> bool {
    value.starts_with("0000") || value.starts_with("1904:01:01") || value.starts_with("1970-01-01T00:00:00")
}
