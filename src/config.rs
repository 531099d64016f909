//! Engine configuration
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `VIDEO_META_*` environment variables. The CLI applies its own flags last.
//!
//! Example configuration file:
//!
//! ```json
//! {
//!   "ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg",
//!   "exiftool_path": "/usr/local/bin/exiftool",
//!   "default_backend": "exiftool",
//!   "log_filter": "video_meta=debug"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::BackendChoice;
use crate::error::{MetadataError, Result};

pub const ENV_FFMPEG: &str = "VIDEO_META_FFMPEG";
pub const ENV_FFPROBE: &str = "VIDEO_META_FFPROBE";
pub const ENV_EXIFTOOL: &str = "VIDEO_META_EXIFTOOL";
pub const ENV_BACKEND: &str = "VIDEO_META_BACKEND";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Transcoding tool binary
    pub ffmpeg_path: PathBuf,
    /// Probe tool used by the metadata reader fallback
    pub ffprobe_path: PathBuf,
    /// Dedicated metadata tool binary
    pub exiftool_path: PathBuf,
    /// Backend used when a request does not name one
    pub default_backend: BackendChoice,
    /// tracing-subscriber filter directive
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            exiftool_path: PathBuf::from("exiftool"),
            default_backend: BackendChoice::Auto,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            MetadataError::InvalidInput(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Defaults, then the optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `VIDEO_META_*` overrides from any key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup(ENV_FFMPEG) {
            self.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_FFPROBE) {
            self.ffprobe_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_EXIFTOOL) {
            self.exiftool_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_BACKEND) {
            self.default_backend = v.parse()?;
        }
        Ok(())
    }
}
