//! External tool discovery
//!
//! Availability of `ffmpeg`, `ffprobe` and `exiftool` is an environment fact.
//! It is probed once per process and then shared read-only by every request.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{MetadataError, Result};

/// Resolved locations of the external tools that answered a probe
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Toolchain {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub exiftool: Option<PathBuf>,
}

static DETECTED: OnceLock<Toolchain> = OnceLock::new();

impl Toolchain {
    /// Probe the default binaries on PATH, once per process
    pub fn detect() -> &'static Toolchain {
        DETECTED.get_or_init(|| Toolchain::probe(&EngineConfig::default()))
    }

    /// Probe the binaries named in `config`
    pub fn probe(config: &EngineConfig) -> Toolchain {
        let toolchain = Toolchain {
            ffmpeg: probe_binary(&config.ffmpeg_path, "-version"),
            ffprobe: probe_binary(&config.ffprobe_path, "-version"),
            exiftool: probe_binary(&config.exiftool_path, "-ver"),
        };

        match &toolchain.ffmpeg {
            Some(path) => info!("FFmpeg is available at {}", path.display()),
            None => warn!("FFmpeg not found; metadata rewriting is unavailable"),
        }
        if toolchain.exiftool.is_none() {
            warn!("ExifTool not found. Some metadata features may be limited.");
        }

        toolchain
    }

    /// Fails when the mandatory transcoding tool is missing
    pub fn require_ffmpeg(&self) -> Result<&Path> {
        self.ffmpeg.as_deref().ok_or_else(|| {
            MetadataError::BackendUnavailable(
                "FFmpeg is required but not found. Please install FFmpeg.".to_string(),
            )
        })
    }

    pub fn has_exiftool(&self) -> bool {
        self.exiftool.is_some()
    }
}

fn probe_binary(program: &Path, version_flag: &str) -> Option<PathBuf> {
    Command::new(program)
        .arg(version_flag)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|_| program.to_path_buf())
}
