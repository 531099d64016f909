//! Metadata Engine
//!
//! Turns a [`MetadataRequest`] into exactly one backend call:
//!
//! 1. validate input, output and the strip/date combination
//! 2. resolve the source into a [`MetadataSet`] (or a strip)
//! 3. apply the date override
//! 4. pick a backend
//! 5. run it and annotate the result
//!
//! Nothing is written before step 5, and a failed step 5 leaves nothing at
//! the output path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendChoice, BackendKind, ExifToolBackend, FfmpegBackend, MetadataBackend, MetadataResult,
    Mp4TagBackend,
};
use crate::config::EngineConfig;
use crate::error::{MetadataError, Result};
use crate::fields::{CreationDate, MetadataSet};
use crate::format::{container_format, validate_input_file, ContainerFormat};
use crate::profiles::{DeviceProfile, ProfileStore};
use crate::tools::Toolchain;

/// Where the metadata for a request comes from
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataSource {
    /// Built-in profile, by exact name
    Profile(String),
    /// Profile loaded for this request only
    Custom(DeviceProfile),
    /// Remove all metadata
    Strip,
}

#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source: MetadataSource,
    /// Overrides any `creation_time` from the source
    pub custom_date: Option<CreationDate>,
    pub backend: BackendChoice,
}

impl MetadataRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, source: MetadataSource) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            source,
            custom_date: None,
            backend: BackendChoice::Auto,
        }
    }

    pub fn with_date(mut self, date: CreationDate) -> Self {
        self.custom_date = Some(date);
        self
    }

    pub fn with_backend(mut self, backend: impl Into<BackendChoice>) -> Self {
        self.backend = backend.into();
        self
    }
}

pub struct MetadataEngine {
    profiles: Arc<ProfileStore>,
    toolchain: Toolchain,
    backends: Vec<Arc<dyn MetadataBackend>>,
}

impl MetadataEngine {
    /// Engine over an already-probed toolchain; backends whose tool is
    /// missing are simply not registered
    pub fn new(profiles: Arc<ProfileStore>, toolchain: Toolchain) -> Self {
        let mut backends: Vec<Arc<dyn MetadataBackend>> = Vec::new();
        if let Some(ffmpeg) = &toolchain.ffmpeg {
            backends.push(Arc::new(FfmpegBackend::new(ffmpeg.clone())));
        }
        if let Some(exiftool) = &toolchain.exiftool {
            backends.push(Arc::new(ExifToolBackend::new(exiftool.clone())));
        }
        backends.push(Arc::new(Mp4TagBackend::new()));

        Self {
            profiles,
            toolchain,
            backends,
        }
    }

    /// Probe the configured tools; fails when ffmpeg is missing
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let toolchain = Toolchain::probe(config);
        toolchain.require_ffmpeg()?;
        Ok(Self::new(Arc::new(ProfileStore::builtin()), toolchain))
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn available_backends(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Run a request, returning errors as `Err`
    pub fn process(&self, request: &MetadataRequest) -> Result<MetadataResult> {
        self.execute(request).1
    }

    /// Run a request, folding any error into a failed [`MetadataResult`]
    pub fn run(&self, request: &MetadataRequest) -> MetadataResult {
        match self.execute(request) {
            (_, Ok(result)) => result,
            (backend, Err(e)) => {
                warn!("Metadata operation failed: {}", e);
                MetadataResult::failure(backend, &e)
            }
        }
    }

    /// Resolved metadata for `source` without touching any file
    pub fn preview(&self, source: &MetadataSource, date: Option<CreationDate>) -> Result<MetadataSet> {
        check_strip_date(source, date)?;
        match source {
            MetadataSource::Strip => Ok(MetadataSet::default()),
            _ => self.resolve_metadata(source, date),
        }
    }

    fn execute(&self, request: &MetadataRequest) -> (Option<BackendKind>, Result<MetadataResult>) {
        let prepared = self.prepare(request);
        let (backend, metadata) = match prepared {
            Ok(p) => p,
            Err(e) => return (None, Err(e)),
        };
        let kind = backend.kind();
        debug!("Using {} for {}", kind, request.input.display());

        let outcome = match &metadata {
            Some(set) => backend.apply(&request.input, &request.output, set),
            None => backend.strip(&request.input, &request.output),
        };

        match outcome {
            Ok(mut result) => {
                result.backend = Some(kind);
                info!("Output file: {}", request.output.display());
                (Some(kind), Ok(result))
            }
            Err(e) => {
                remove_stale_output(&request.output);
                (Some(kind), Err(e))
            }
        }
    }

    /// Every check that can fail before a backend runs
    fn prepare(
        &self,
        request: &MetadataRequest,
    ) -> Result<(Arc<dyn MetadataBackend>, Option<MetadataSet>)> {
        let input_format = validate_input_file(&request.input)?;
        let output_format = validate_output(&request.input, &request.output)?;
        check_strip_date(&request.source, request.custom_date)?;

        let metadata = match &request.source {
            MetadataSource::Strip => None,
            source => Some(self.resolve_metadata(source, request.custom_date)?),
        };

        let backend = self.resolve_backend(request.backend, input_format, output_format)?;
        Ok((backend, metadata))
    }

    fn resolve_metadata(&self, source: &MetadataSource, date: Option<CreationDate>) -> Result<MetadataSet> {
        let profile = match source {
            MetadataSource::Profile(name) => self.profiles.get_profile(name)?,
            MetadataSource::Custom(profile) => profile,
            MetadataSource::Strip => return Ok(MetadataSet::default()),
        };

        let set = MetadataSet::from_attributes(&profile.attributes)
            .map_err(|e| MetadataError::InvalidProfileFormat(format!("{}: {}", profile.name, e)))?;
        Ok(match date {
            Some(date) => set.with_creation_time(date),
            None => set,
        })
    }

    /// Explicit choices never fall back; `Auto` prefers exiftool, then ffmpeg
    pub fn resolve_backend(
        &self,
        choice: BackendChoice,
        input: ContainerFormat,
        output: ContainerFormat,
    ) -> Result<Arc<dyn MetadataBackend>> {
        match choice {
            BackendChoice::Specific(kind) => {
                let backend = self.backend(kind).ok_or_else(|| {
                    MetadataError::BackendUnavailable(format!("{} is not installed or not found", kind))
                })?;
                for format in [input, output] {
                    if !backend.supports(format) {
                        return Err(MetadataError::UnsupportedFormat(format!(
                            "{} cannot handle .{} files",
                            kind, format
                        )));
                    }
                }
                Ok(backend)
            }
            BackendChoice::Auto => {
                if let Some(exiftool) = self.backend(BackendKind::ExifTool) {
                    if exiftool.supports(input) && exiftool.supports(output) {
                        return Ok(exiftool);
                    }
                }
                self.backend(BackendKind::Ffmpeg).ok_or_else(|| {
                    MetadataError::BackendUnavailable(
                        "No suitable backend: ffmpeg is not installed".to_string(),
                    )
                })
            }
        }
    }

    fn backend(&self, kind: BackendKind) -> Option<Arc<dyn MetadataBackend>> {
        self.backends.iter().find(|b| b.kind() == kind).cloned()
    }
}

fn check_strip_date(source: &MetadataSource, date: Option<CreationDate>) -> Result<()> {
    if matches!(source, MetadataSource::Strip) && date.is_some() {
        return Err(MetadataError::InvalidInput(
            "Cannot combine strip with a custom date".to_string(),
        ));
    }
    Ok(())
}

fn validate_output(input: &Path, output: &Path) -> Result<ContainerFormat> {
    let format = container_format(output)?;

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(MetadataError::InvalidInput(format!(
            "Output directory does not exist: {}",
            parent.display()
        )));
    }

    let same = match (input.canonicalize(), parent.canonicalize(), output.file_name()) {
        (Ok(input), Ok(parent), Some(name)) => input == parent.join(name),
        _ => false,
    };
    if same {
        return Err(MetadataError::InvalidInput(
            "Output path must differ from the input file".to_string(),
        ));
    }

    Ok(format)
}

fn remove_stale_output(output: &Path) {
    if output.exists() {
        warn!("Removing stale output {}", output.display());
        if let Err(e) = std::fs::remove_file(output) {
            warn!("Could not remove {}: {}", output.display(), e);
        }
    }
}
