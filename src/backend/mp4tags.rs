//! Container-tag-library backend: in-process MP4 `ilst` editing via mp4ameta
//!
//! `mp4ameta` owns the `ilst`; everything else that carries device data
//! (`udta` text atoms, `mdta` keys, header box dates) goes through
//! [`MovieEdit`] on the same staged copy, before the tag is read.

use mp4ameta::{Data, FreeformIdent, Tag};
use std::path::Path;
use tracing::{debug, info};

use super::atoms::MovieEdit;
use super::{plan_fields, BackendKind, MetadataBackend, MetadataResult};
use crate::error::{MetadataError, Result};
use crate::fields::{MetadataField, MetadataSet};
use crate::format::{container_format, ContainerFormat};
use crate::staging::StagedOutput;

const ALL_FIELDS: &[MetadataField] = &MetadataField::ALL;

/// Namespace for freeform `----` atoms
const FREEFORM_MEAN: &str = "com.apple.iTunes";

/// Where a field lands inside the `ilst`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagAtom {
    /// `©too`
    Encoder,
    /// `©day`
    Day,
    /// `----:com.apple.iTunes:<name>`
    Freeform(&'static str),
}

fn atom_for(field: MetadataField) -> TagAtom {
    match field {
        MetadataField::Encoder => TagAtom::Encoder,
        MetadataField::CreationTime => TagAtom::Day,
        // ©swr would be read back as "encoder" by most demuxers
        other => TagAtom::Freeform(other.as_str()),
    }
}

#[derive(Debug, Default)]
pub struct Mp4TagBackend;

impl Mp4TagBackend {
    pub fn new() -> Self {
        Self
    }

    fn ensure_supported(&self, path: &Path) -> Result<ContainerFormat> {
        let format = container_format(path)?;
        if !self.supports(format) {
            return Err(MetadataError::UnsupportedFormat(format!(
                "mp4tags only handles MP4-family containers, got .{} ({})",
                format,
                path.display()
            )));
        }
        Ok(format)
    }

    fn read_tag(path: &Path) -> Result<Tag> {
        Tag::read_from_path(path).map_err(|e| {
            MetadataError::ExternalToolFailure(format!("Failed to read MP4 tags: {}", e))
        })
    }

    fn write_tag(tag: &Tag, path: &Path) -> Result<()> {
        tag.write_to_path(path).map_err(|e| {
            MetadataError::ExternalToolFailure(format!("Failed to write MP4 tags: {}", e))
        })
    }

    fn set_fields(tag: &mut Tag, metadata: &MetadataSet) {
        for (field, value) in &metadata.fields {
            Self::set_atom(tag, atom_for(*field), value.clone());
        }
        if let Some(date) = metadata.creation_time {
            Self::set_atom(tag, TagAtom::Day, date.to_rfc3339_seconds());
        }
    }

    fn set_atom(tag: &mut Tag, atom: TagAtom, value: String) {
        debug!("Setting {:?} = {}", atom, value);
        match atom {
            TagAtom::Encoder => tag.set_encoder(value),
            TagAtom::Day => tag.set_year(value),
            TagAtom::Freeform(name) => {
                tag.set_data(FreeformIdent::new(FREEFORM_MEAN, name), Data::Utf8(value))
            }
        }
    }

    /// Copy `input` into a fresh stage, run `edit` on it and read its tag
    fn stage_copy(&self, input: &Path, output: &Path, edit: MovieEdit) -> Result<(StagedOutput, Tag)> {
        self.ensure_supported(input)?;
        self.ensure_supported(output)?;

        let stage = StagedOutput::new(output)?;
        std::fs::copy(input, stage.path())?;
        if edit.apply_to_file(stage.path())? {
            debug!("Rewrote movie boxes in {}", stage.path().display());
        }
        let tag = Self::read_tag(stage.path())?;
        Ok((stage, tag))
    }
}

impl MetadataBackend for Mp4TagBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mp4Tags
    }

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
        let edit = MovieEdit::retag(metadata.creation_time);
        let (stage, mut tag) = self.stage_copy(input, output, edit)?;
        let format = container_format(output)?;
        let (written, skipped) = plan_fields(self, format, metadata);

        Self::set_fields(&mut tag, metadata);
        Self::write_tag(&tag, stage.path())?;
        let path = stage.commit()?;

        info!("Metadata modified with mp4ameta. Output saved to {}", path.display());
        Ok(MetadataResult::written(self.kind(), &path, written, skipped))
    }

    fn strip(&self, input: &Path, output: &Path) -> Result<MetadataResult> {
        let (stage, mut tag) = self.stage_copy(input, output, MovieEdit::strip())?;

        tag.clear();
        Self::write_tag(&tag, stage.path())?;
        let path = stage.commit()?;

        info!("Metadata stripped with mp4ameta. Output saved to {}", path.display());
        Ok(MetadataResult::stripped(self.kind(), &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::atoms::fixture::{contains, header_times, movie, quicktime_seconds, Movie};
    use crate::fields::CreationDate;

    fn iphone_recording(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("IMG_0001.mp4");
        let bytes = movie(&Movie {
            created: Some(CreationDate::parse("2019-01-01 00:00:00").unwrap()),
            udta: &[(b"\xa9mak", "Apple"), (b"\xa9mod", "iPhone 14 Pro"), (b"\xa9swr", "17.4.1")],
            keys: &[
                ("com.apple.quicktime.make", "Apple"),
                ("com.apple.quicktime.model", "iPhone 14 Pro"),
            ],
            ..Default::default()
        });
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_atom_mapping() {
        assert_eq!(atom_for(MetadataField::Encoder), TagAtom::Encoder);
        assert_eq!(atom_for(MetadataField::CreationTime), TagAtom::Day);
        assert_eq!(atom_for(MetadataField::Make), TagAtom::Freeform("make"));
        assert_eq!(atom_for(MetadataField::CreationTool), TagAtom::Freeform("creation_tool"));
    }

    #[test]
    fn test_rejects_non_mp4_family() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mkv");
        let output = dir.path().join("out.mkv");
        std::fs::write(&input, b"\x1a\x45\xdf\xa3").unwrap();

        let backend = Mp4TagBackend::new();
        let err = backend.apply(&input, &output, &MetadataSet::default()).unwrap_err();
        assert!(matches!(err, MetadataError::UnsupportedFormat(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_corrupt_input_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"definitely not an mp4 file").unwrap();

        let err = Mp4TagBackend::new().strip(&input, &output).unwrap_err();
        assert!(matches!(err, MetadataError::ExternalToolFailure(_)));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_strip_removes_quicktime_atoms_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let input = iphone_recording(dir.path());
        let output = dir.path().join("clean.mp4");

        let result = Mp4TagBackend::new().strip(&input, &output).unwrap();
        assert!(result.success);

        let bytes = std::fs::read(&output).unwrap();
        assert!(!contains(&bytes, b"Apple"));
        assert!(!contains(&bytes, b"iPhone"));
        assert!(!contains(&bytes, b"17.4.1"));
        assert!(!contains(&bytes, b"com.apple.quicktime"));
        assert!(header_times(&bytes).iter().all(|&t| t == 0));
        assert!(Tag::read_from_path(&output).unwrap().year().is_none());
    }

    #[test]
    fn test_apply_replaces_device_and_header_dates() {
        let dir = tempfile::tempdir().unwrap();
        let input = iphone_recording(dir.path());
        let output = dir.path().join("pixel.mp4");

        let mut set = MetadataSet::default();
        set.fields.insert(MetadataField::Make, "Google".to_string());
        set.fields.insert(MetadataField::Model, "Pixel 9 Pro".to_string());
        set.fields.insert(MetadataField::Encoder, "HEVC (H.265)".to_string());
        let set = set.with_creation_time(CreationDate::parse("2024-07-01 10:00:00").unwrap());

        let result = Mp4TagBackend::new().apply(&input, &output, &set).unwrap();
        assert!(result.skipped.is_empty());
        assert_eq!(result.written[&MetadataField::CreationTime], "2024-07-01 10:00:00");

        let bytes = std::fs::read(&output).unwrap();
        assert!(!contains(&bytes, b"Apple"));
        assert!(!contains(&bytes, b"iPhone"));
        assert!(contains(&bytes, b"Pixel 9 Pro"));
        assert_eq!(header_times(&bytes), vec![quicktime_seconds("2024-07-01 10:00:00")]);

        let tag = Tag::read_from_path(&output).unwrap();
        assert_eq!(tag.encoder(), Some("HEVC (H.265)"));
        assert_eq!(tag.year(), Some("2024-07-01T10:00:00Z"));
        // input untouched
        assert!(contains(&std::fs::read(&input).unwrap(), b"iPhone 14 Pro"));
    }

    #[test]
    fn test_apply_without_date_keeps_header_dates() {
        let dir = tempfile::tempdir().unwrap();
        let input = iphone_recording(dir.path());
        let output = dir.path().join("out.m4v");

        let mut set = MetadataSet::default();
        set.fields.insert(MetadataField::Make, "Sony".to_string());
        Mp4TagBackend::new().apply(&input, &output, &set).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(header_times(&bytes), vec![quicktime_seconds("2019-01-01 00:00:00")]);
        assert!(!contains(&bytes, b"Apple"));
    }
}
