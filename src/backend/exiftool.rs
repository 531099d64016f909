//! Dedicated-tool backend: ExifTool QuickTime/XMP tag writing

use std::path::{Path, PathBuf};
use tracing::info;

use super::{output_format, plan_fields, BackendKind, MetadataBackend, MetadataResult};
use crate::command::ToolCommand;
use crate::error::Result;
use crate::fields::{MetadataField, MetadataSet};
use crate::format::ContainerFormat;
use crate::staging::StagedOutput;

const ALL_FIELDS: &[MetadataField] = &MetadataField::ALL;

/// Date tags set from one creation date
const DATE_TAGS: &[&str] = &["QuickTime:CreateDate", "QuickTime:ModifyDate", "Keys:CreationDate"];

pub struct ExifToolBackend {
    binary: PathBuf,
}

impl ExifToolBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// ExifTool tag name for a text field
    fn tag_name(field: MetadataField) -> Option<&'static str> {
        match field {
            MetadataField::Make => Some("QuickTime:Make"),
            MetadataField::Model => Some("QuickTime:Model"),
            MetadataField::Software => Some("QuickTime:Software"),
            MetadataField::Encoder => Some("QuickTime:Encoder"),
            // QuickTime has no creator-tool atom; XMP does
            MetadataField::CreationTool => Some("XMP-xmp:CreatorTool"),
            MetadataField::CreationTime => None,
        }
    }

    fn base_command(&self) -> ToolCommand {
        ToolCommand::new(&self.binary).args(&["-m", "-q"])
    }

    pub(crate) fn apply_command(&self, input: &Path, output: &Path, metadata: &MetadataSet) -> ToolCommand {
        let mut tags = Vec::new();
        for (field, value) in &metadata.fields {
            if let Some(tag) = Self::tag_name(*field) {
                tags.push(format!("-{}={}", tag, value));
            }
        }
        if let Some(date) = metadata.creation_time {
            // QuickTime stores UTC; the value is passed through unconverted
            let stamp = date.to_exif();
            tags.extend(DATE_TAGS.iter().map(|tag| format!("-{}={}", tag, stamp)));
        }

        self.base_command()
            .args_owned(tags)
            .arg("-o")
            .output(output)
            .output(input)
    }

    pub(crate) fn strip_command(&self, input: &Path, output: &Path) -> ToolCommand {
        self.base_command()
            .arg("-all=")
            .arg("-o")
            .output(output)
            .output(input)
    }
}

impl MetadataBackend for ExifToolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ExifTool
    }

    /// ExifTool can write QuickTime-based files but not Matroska or AVI
    fn supports(&self, format: ContainerFormat) -> bool {
        format.is_mp4_family()
    }

    fn writable_fields(&self, format: ContainerFormat) -> &'static [MetadataField] {
        if self.supports(format) {
            ALL_FIELDS
        } else {
            &[]
        }
    }

    fn apply(&self, input: &Path, output: &Path, metadata: &MetadataSet) -> Result<MetadataResult> {
        let format = output_format(output)?;
        let (written, skipped) = plan_fields(self, format, metadata);

        let stage = StagedOutput::new(output)?;
        self.apply_command(input, stage.path(), metadata).execute()?;
        let path = stage.commit()?;

        info!("Metadata modified with ExifTool. Output saved to {}", path.display());
        Ok(MetadataResult::written(self.kind(), &path, written, skipped))
    }

    fn strip(&self, input: &Path, output: &Path) -> Result<MetadataResult> {
        let stage = StagedOutput::new(output)?;
        self.strip_command(input, stage.path()).execute()?;
        let path = stage.commit()?;

        info!("Metadata stripped with ExifTool. Output saved to {}", path.display());
        Ok(MetadataResult::stripped(self.kind(), &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::CreationDate;

    #[test]
    fn test_apply_command_tags() {
        let mut set = MetadataSet::default();
        set.fields.insert(MetadataField::Make, "Samsung".to_string());
        set.fields.insert(MetadataField::CreationTool, "Samsung Galaxy S24 Ultra".to_string());
        let set = set.with_creation_time(CreationDate::parse("2024-02-29 23:59:58").unwrap());

        let backend = ExifToolBackend::new("exiftool");
        let args = backend
            .apply_command(Path::new("in.mov"), Path::new("out.mov"), &set)
            .arg_strings();

        assert!(args.contains(&"-QuickTime:Make=Samsung".to_string()));
        assert!(args.contains(&"-XMP-xmp:CreatorTool=Samsung Galaxy S24 Ultra".to_string()));
        assert!(args.contains(&"-QuickTime:CreateDate=2024:02:29 23:59:58".to_string()));
        assert!(args.contains(&"-Keys:CreationDate=2024:02:29 23:59:58".to_string()));
        assert_eq!(&args[args.len() - 3..], &["-o", "out.mov", "in.mov"]);
    }

    #[test]
    fn test_strip_command() {
        let backend = ExifToolBackend::new("exiftool");
        let args = backend
            .strip_command(Path::new("in.mp4"), Path::new("out.mp4"))
            .arg_strings();
        assert!(args.contains(&"-all=".to_string()));
        assert_eq!(&args[args.len() - 3..], &["-o", "out.mp4", "in.mp4"]);
    }

    #[test]
    fn test_supports_mp4_family_only() {
        let backend = ExifToolBackend::new("exiftool");
        assert!(backend.supports(ContainerFormat::Mp4));
        assert!(backend.supports(ContainerFormat::ThreeGp));
        assert!(!backend.supports(ContainerFormat::Mkv));
        assert!(!backend.supports(ContainerFormat::Avi));
        assert!(backend.writable_fields(ContainerFormat::Avi).is_empty());
    }
}
