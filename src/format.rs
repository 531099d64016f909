//! Container format detection by file extension

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{MetadataError, Result};

/// Supported container extensions, lowercase and without the dot
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v", "3gp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Mov,
    Avi,
    Mkv,
    M4v,
    #[serde(rename = "3gp")]
    ThreeGp,
}

impl ContainerFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" => Some(ContainerFormat::Mp4),
            "mov" => Some(ContainerFormat::Mov),
            "avi" => Some(ContainerFormat::Avi),
            "mkv" => Some(ContainerFormat::Mkv),
            "m4v" => Some(ContainerFormat::M4v),
            "3gp" => Some(ContainerFormat::ThreeGp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::M4v => "m4v",
            ContainerFormat::ThreeGp => "3gp",
        }
    }

    /// ISO base media / QuickTime containers sharing the atom layout
    pub fn is_mp4_family(&self) -> bool {
        matches!(
            self,
            ContainerFormat::Mp4 | ContainerFormat::Mov | ContainerFormat::M4v | ContainerFormat::ThreeGp
        )
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 | ContainerFormat::M4v => "video/mp4",
            ContainerFormat::Mov => "video/quicktime",
            ContainerFormat::Avi => "video/x-msvideo",
            ContainerFormat::Mkv => "video/x-matroska",
            ContainerFormat::ThreeGp => "video/3gpp",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// True iff the path carries a supported container extension (any case)
pub fn is_supported(path: &Path) -> bool {
    ContainerFormat::from_path(path).is_some()
}

/// Container format of `path`, or `InvalidInput` naming the bad extension
pub fn container_format(path: &Path) -> Result<ContainerFormat> {
    ContainerFormat::from_path(path).ok_or_else(|| {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_else(|| "(none)".to_string());
        MetadataError::InvalidInput(format!(
            "Unsupported file format: {} ({})",
            ext,
            path.display()
        ))
    })
}

/// Validate that the input file exists and is a supported video format
pub fn validate_input_file(path: &Path) -> Result<ContainerFormat> {
    if !path.exists() {
        return Err(MetadataError::InvalidInput(format!(
            "Input file does not exist: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(MetadataError::InvalidInput(format!(
            "Input path is not a file: {}",
            path.display()
        )));
    }
    container_format(path)
}
