//! Transcode-based backend: ffmpeg stream copy with `-metadata`

use std::path::{Path, PathBuf};
use tracing::info;

use super::{output_format, plan_fields, BackendKind, MetadataBackend, MetadataResult};
use crate::command::ToolCommand;
use crate::error::Result;
use crate::fields::{MetadataField, MetadataSet};
use crate::format::ContainerFormat;
use crate::staging::StagedOutput;

/// libavformat always replaces `encoder` with its own identification string
const WRITABLE_FIELDS: &[MetadataField] = &[
    MetadataField::Make,
    MetadataField::Model,
    MetadataField::Software,
    MetadataField::CreationTool,
    MetadataField::CreationTime,
];

/// The AVI muxer only maps a fixed set of RIFF INFO keys; ICRD is the one we use
const AVI_FIELDS: &[MetadataField] = &[MetadataField::CreationTime];

/// Other keys the demuxers report for the same value. `-map_metadata 0`
/// would carry them over next to the new tag, so they are blanked.
fn aliases(field: MetadataField) -> &'static [&'static str] {
    match field {
        MetadataField::Make => &["com.apple.quicktime.make"],
        MetadataField::Model => &["com.apple.quicktime.model"],
        MetadataField::Software => &["com.apple.quicktime.software"],
        MetadataField::CreationTime => &["date", "com.apple.quicktime.creationdate"],
        MetadataField::Encoder | MetadataField::CreationTool => &[],
    }
}

pub struct FfmpegBackend {
    binary: PathBuf,
}

impl FfmpegBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn base_command(&self, input: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary)
            .args(&["-hide_banner", "-loglevel", "error", "-y"])
            .input(input)
            // every stream, not just the default one video and one audio
            .args(&["-map", "0", "-c", "copy"])
    }

    /// `-metadata key=value` pairs for the fields `format` can carry
    fn metadata_args(&self, format: ContainerFormat, metadata: &MetadataSet) -> Vec<String> {
        let writable = self.writable_fields(format);
        let mut args = Vec::new();

        if format != ContainerFormat::Avi {
            for field in metadata.requested_fields() {
                if writable.contains(&field) {
                    for alias in aliases(field) {
                        args.push("-metadata".to_string());
                        args.push(format!("{}=", alias));
                    }
                }
            }
        }

        for (field, value) in &metadata.fields {
            if writable.contains(field) {
                args.push("-metadata".to_string());
                args.push(format!("{}={}", field.as_str(), value));
            }
        }

        if let Some(date) = metadata.creation_time {
            if writable.contains(&MetadataField::CreationTime) {
                let (key, value) = match format {
                    ContainerFormat::Avi => ("date", date.to_string()),
                    _ => ("creation_time", date.to_iso8601()),
                };
                args.push("-metadata".to_string());
                args.push(format!("{}={}", key, value));
            }
        }

        args
    }

    pub(crate) fn apply_command(
        &self,
        input: &Path,
        output: &Path,
        format: ContainerFormat,
        metadata: &MetadataSet,
    ) -> ToolCommand {
        let mut cmd = self
            .base_command(input)
            .args(&["-map_metadata", "0", "-map_chapters", "0"]);
        if format.is_mp4_family() {
            // Without this the mov muxer drops keys it has no atom for
            cmd = cmd.args(&["-movflags", "use_metadata_tags"]);
        }
        cmd.args_owned(self.metadata_args(format, metadata)).output(output)
    }

    pub(crate) fn strip_command(&self, input: &Path, output: &Path) -> ToolCommand {
        self.base_command(input)
            .args(&[
                "-map_metadata", "-1",
                "-map_chapters", "-1",
                // keeps the muxer from stamping its own encoder tag
                "-fflags", "+bitexact",
            ])
            .output(output)
    }
}

impl MetadataBackend for FfmpegBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ffmpeg
    }

    fn supports(&self, _format: ContainerFormat) -> bool {
        true
    }

    fn writable_fields(&self, format: ContainerFormat) -> &'static [MetadataField] {
        match format {
            ContainerFormat::Avi => AVI_FIELDS,
            _ => WRITABLE_FIELDS,
        }
    }

    fn apply(&self, input: &Path, output: &Path, metadata: &MetadataSet) -> Result<MetadataResult> {
        let format = output_format(output)?;
        let (written, skipped) = plan_fields(self, format, metadata);

        let stage = StagedOutput::new(output)?;
        self.apply_command(input, stage.path(), format, metadata).execute()?;
        let path = stage.commit()?;

        info!("Metadata successfully modified with FFmpeg. Output saved to {}", path.display());
        Ok(MetadataResult::written(self.kind(), &path, written, skipped))
    }

    fn strip(&self, input: &Path, output: &Path) -> Result<MetadataResult> {
        let stage = StagedOutput::new(output)?;
        self.strip_command(input, stage.path()).execute()?;
        let path = stage.commit()?;

        info!("Metadata stripped with FFmpeg. Output saved to {}", path.display());
        Ok(MetadataResult::stripped(self.kind(), &path))
    }
}
