//! Metadata backends
//!
//! Three interchangeable ways of rewriting container tags:
//!
//! 1. **ffmpeg** - stream-copy remux with `-metadata`; works on every
//!    supported container and is the universal fallback
//! 2. **exiftool** - richer QuickTime/XMP vocabulary, MP4 family only,
//!    optional on the host
//! 3. **mp4tags** - in-process `ilst` editing through `mp4ameta`, MP4 family
//!    only, no subprocess
//!
//! The engine only talks to [`MetadataBackend`]; picking one is done by
//! [`crate::engine::MetadataEngine`] from a [`BackendChoice`].

pub(crate) mod atoms;
mod exiftool;
mod ffmpeg;
mod mp4tags;

pub use exiftool::ExifToolBackend;
pub use ffmpeg::FfmpegBackend;
pub use mp4tags::Mp4TagBackend;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::error::{MetadataError, Result};
use crate::fields::{FieldMap, MetadataField, MetadataSet};
use crate::format::ContainerFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ffmpeg,
    #[serde(rename = "exiftool")]
    ExifTool,
    #[serde(rename = "mp4tags")]
    Mp4Tags,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Ffmpeg, BackendKind::ExifTool, BackendKind::Mp4Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ffmpeg => "ffmpeg",
            BackendKind::ExifTool => "exiftool",
            BackendKind::Mp4Tags => "mp4tags",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(BackendKind::Ffmpeg),
            "exiftool" => Ok(BackendKind::ExifTool),
            "mp4tags" | "mutagen" | "taglib" => Ok(BackendKind::Mp4Tags),
            other => Err(MetadataError::InvalidInput(format!(
                "Unknown backend '{}': expected ffmpeg, exiftool or mp4tags",
                other
            ))),
        }
    }
}

/// Caller's backend preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendChoice {
    /// exiftool when present and compatible, otherwise ffmpeg
    #[default]
    Auto,
    Specific(BackendKind),
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Auto => f.write_str("auto"),
            BackendChoice::Specific(kind) => kind.fmt(f),
        }
    }
}

impl FromStr for BackendChoice {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(BackendChoice::Auto)
        } else {
            s.parse().map(BackendChoice::Specific)
        }
    }
}

impl TryFrom<String> for BackendChoice {
    type Error = MetadataError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<BackendChoice> for String {
    fn from(choice: BackendChoice) -> Self {
        choice.to_string()
    }
}

impl From<BackendKind> for BackendChoice {
    fn from(kind: BackendKind) -> Self {
        BackendChoice::Specific(kind)
    }
}

/// Outcome of one engine operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataResult {
    pub success: bool,
    /// Backend actually used, once one was selected
    pub backend: Option<BackendKind>,
    pub output_path: Option<String>,
    /// Fields written, with the values as requested
    pub written: FieldMap,
    /// Requested fields the backend cannot express for this container
    pub skipped: Vec<MetadataField>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl MetadataResult {
    pub fn written(backend: BackendKind, output: &Path, written: FieldMap, skipped: Vec<MetadataField>) -> Self {
        Self {
            success: true,
            backend: Some(backend),
            output_path: Some(output.display().to_string()),
            written,
            skipped,
            error: None,
            error_kind: None,
        }
    }

    pub fn stripped(backend: BackendKind, output: &Path) -> Self {
        Self::written(backend, output, FieldMap::new(), Vec::new())
    }

    pub fn failure(backend: Option<BackendKind>, err: &MetadataError) -> Self {
        Self {
            success: false,
            backend,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            ..Default::default()
        }
    }
}

/// Capability pair every backend provides
pub trait MetadataBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether this backend can read and write `format`
    fn supports(&self, format: ContainerFormat) -> bool;

    /// Fields this backend can express in `format`
    fn writable_fields(&self, format: ContainerFormat) -> &'static [MetadataField];

    /// Write `metadata` into a copy of `input` at `output`
    fn apply(&self, input: &Path, output: &Path, metadata: &MetadataSet) -> Result<MetadataResult>;

    /// Copy `input` to `output` with all metadata removed
    fn strip(&self, input: &Path, output: &Path) -> Result<MetadataResult>;
}

/// Split `metadata` into what `backend` can write for `format` and what it
/// must skip, warning once per skipped field
pub(crate) fn plan_fields(
    backend: &dyn MetadataBackend,
    format: ContainerFormat,
    metadata: &MetadataSet,
) -> (FieldMap, Vec<MetadataField>) {
    let (written, skipped) = metadata.partition(backend.writable_fields(format));
    for field in &skipped {
        warn!(
            "{} cannot write '{}' into {} containers; skipping",
            backend.kind(),
            field,
            format
        );
    }
    (written, skipped)
}

pub(crate) fn output_format(output: &Path) -> Result<ContainerFormat> {
    crate::format::container_format(output)
}
