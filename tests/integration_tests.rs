//! Integration tests for video_meta engine and service operations
//!
//! Tests that need real media generate a short clip with ffmpeg's `testsrc`
//! and are skipped when ffmpeg/ffprobe are not installed.

use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use video_meta::service::{MediaService, MetadataService, ServiceRequest};
use video_meta::{
    BackendKind, CreationDate, MetadataEngine, MetadataError, MetadataField, MetadataReader,
    MetadataRequest, MetadataSource, ProfileStore, ReaderBackend, Toolchain,
};

/// Detected tools, or `None` when the media tests cannot run here
fn media_tools() -> Option<&'static Toolchain> {
    let tools = Toolchain::detect();
    if tools.ffmpeg.is_some() && tools.ffprobe.is_some() {
        Some(tools)
    } else {
        eprintln!("ffmpeg/ffprobe not installed; skipping");
        None
    }
}

/// One second of test pattern, optionally pre-tagged
fn make_video(tools: &Toolchain, dir: &Path, name: &str, tags: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut cmd = Command::new(tools.ffmpeg.as_ref().unwrap());
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "lavfi", "-i", "testsrc=duration=1:size=64x64:rate=10"])
        .args(["-c:v", "mpeg4"]);
    for (key, value) in tags {
        cmd.arg("-metadata").arg(format!("{}={}", key, value));
    }
    let status = cmd.arg(&path).status().unwrap();
    assert!(status.success(), "failed to generate {}", name);
    path
}

/// MP4 carrying iPhone-style `mdta` keys and a 2019 creation time
fn make_iphone_clip(tools: &Toolchain, dir: &Path) -> PathBuf {
    let path = dir.join("IMG_0001.mp4");
    let status = Command::new(tools.ffmpeg.as_ref().unwrap())
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "lavfi", "-i", "testsrc=duration=1:size=64x64:rate=10"])
        .args(["-c:v", "mpeg4", "-movflags", "use_metadata_tags"])
        .args(["-metadata", "com.apple.quicktime.make=Apple"])
        .args(["-metadata", "com.apple.quicktime.model=iPhone 14 Pro"])
        .args(["-metadata", "com.apple.quicktime.software=17.4.1"])
        .args(["-metadata", "creation_time=2019-01-01T00:00:00.000000Z"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success(), "failed to generate IMG_0001.mp4");
    path
}

fn engine(tools: &Toolchain) -> MetadataEngine {
    MetadataEngine::new(Arc::new(ProfileStore::builtin()), tools.clone())
}

/// Reader pinned to ffprobe so results do not depend on exiftool
fn ffprobe_reader(tools: &Toolchain) -> MetadataReader {
    MetadataReader::new(&Toolchain {
        exiftool: None,
        ..tools.clone()
    })
}

fn request(op: &str, input: serde_json::Value) -> ServiceRequest {
    ServiceRequest {
        op: op.to_string(),
        input,
        context: HashMap::new(),
    }
}

#[test]
fn test_ffmpeg_apply_profile_mp4() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.mp4", &[]);
    let before = std::fs::read(&input).unwrap();
    let output = dir.path().join("clip_iphone.mp4");

    let request = MetadataRequest::new(&input, &output, MetadataSource::Profile("iPhone 14 Pro".to_string()))
        .with_date(CreationDate::parse("2023-05-06 07:08:09").unwrap())
        .with_backend(BackendKind::Ffmpeg);
    let result = engine(tools).process(&request).unwrap();

    assert!(result.success);
    assert_eq!(result.backend, Some(BackendKind::Ffmpeg));
    assert_eq!(result.skipped, vec![MetadataField::Encoder]);
    assert_eq!(std::fs::read(&input).unwrap(), before, "input must not change");

    let meta = ffprobe_reader(tools).read_metadata(&output).unwrap();
    assert_eq!(meta.backend, ReaderBackend::FFprobe);
    assert_eq!(meta.get(MetadataField::Make), Some("Apple"));
    assert_eq!(meta.get(MetadataField::Model), Some("iPhone 14 Pro"));
    assert_eq!(meta.get(MetadataField::CreationTime), Some("2023-05-06 07:08:09"));
    assert_eq!(meta.file_info.file_format, "MP4");
}

#[test]
fn test_ffmpeg_strip_mkv() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "tagged.mkv", &[("make", "Sony"), ("model", "XQ-DQ74")]);
    let output = dir.path().join("clean.mkv");

    let reader = ffprobe_reader(tools);
    assert!(reader.read_metadata(&input).unwrap().has_identifying_fields());

    let request = MetadataRequest::new(&input, &output, MetadataSource::Strip).with_backend(BackendKind::Ffmpeg);
    let result = engine(tools).run(&request);
    assert!(result.success, "{:?}", result.error);
    assert!(result.written.is_empty());

    let meta = reader.read_metadata(&output).unwrap();
    assert!(!meta.has_identifying_fields(), "left behind: {:?}", meta.fields);
}

#[test]
fn test_ffmpeg_avi_reports_skipped_fields() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.avi", &[]);
    let output = dir.path().join("out.avi");

    let request = MetadataRequest::new(&input, &output, MetadataSource::Profile("Xiaomi 15".to_string()))
        .with_date(CreationDate::parse("2025-01-02").unwrap())
        .with_backend(BackendKind::Ffmpeg);
    let result = engine(tools).process(&request).unwrap();

    assert!(result.success);
    assert!(output.exists());
    assert_eq!(result.written[&MetadataField::CreationTime], "2025-01-02 00:00:00");
    assert!(result.skipped.contains(&MetadataField::Encoder));
    assert!(result.skipped.contains(&MetadataField::Make));
    assert!(result.skipped.contains(&MetadataField::Model));
}

#[test]
fn test_mp4tags_apply_and_strip() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.mp4", &[]);
    let tagged = dir.path().join("tagged.mp4");
    let clean = dir.path().join("clean.mp4");
    let engine = engine(tools);

    let request = MetadataRequest::new(&input, &tagged, MetadataSource::Profile("Google Pixel 9 Pro".to_string()))
        .with_backend(BackendKind::Mp4Tags);
    let result = engine.process(&request).unwrap();
    assert_eq!(result.backend, Some(BackendKind::Mp4Tags));
    assert_eq!(result.written[&MetadataField::Model], "Pixel 9 Pro");

    let tag = mp4ameta::Tag::read_from_path(&tagged).unwrap();
    assert_eq!(tag.encoder(), Some("HEVC (H.265)"));

    let request = MetadataRequest::new(&tagged, &clean, MetadataSource::Strip).with_backend(BackendKind::Mp4Tags);
    engine.process(&request).unwrap();

    let tag = mp4ameta::Tag::read_from_path(&clean).unwrap();
    assert!(tag.encoder().is_none());
    assert!(tag.year().is_none());
}

#[test]
fn test_ffmpeg_apply_replaces_leftover_device_keys() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_iphone_clip(tools, dir.path());
    let output = dir.path().join("galaxy.mp4");

    let reader = ffprobe_reader(tools);
    assert_eq!(reader.read_metadata(&input).unwrap().get(MetadataField::Make), Some("Apple"));

    let request = MetadataRequest::new(&input, &output, MetadataSource::Profile("Samsung Galaxy S24 Ultra".to_string()))
        .with_date(CreationDate::parse("2024-07-01 10:00:00").unwrap())
        .with_backend(BackendKind::Ffmpeg);
    engine(tools).process(&request).unwrap();

    let meta = reader.read_metadata(&output).unwrap();
    assert_eq!(meta.get(MetadataField::Make), Some("Samsung"));
    assert_eq!(meta.get(MetadataField::Model), Some("SM-S928B"));
    assert_eq!(meta.get(MetadataField::CreationTime), Some("2024-07-01 10:00:00"));
    assert!(!meta.raw_tags.contains_key("com.apple.quicktime.make"), "{:?}", meta.raw_tags);
    assert!(!meta.raw_tags.contains_key("com.apple.quicktime.model"));
}

#[test]
fn test_mp4tags_retag_and_strip_read_back() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_iphone_clip(tools, dir.path());
    let tagged = dir.path().join("galaxy.mp4");
    let clean = dir.path().join("clean.mp4");
    let engine = engine(tools);
    let reader = ffprobe_reader(tools);

    let request = MetadataRequest::new(&input, &tagged, MetadataSource::Profile("Samsung Galaxy S24 Ultra".to_string()))
        .with_date(CreationDate::parse("2024-07-01 10:00:00").unwrap())
        .with_backend(BackendKind::Mp4Tags);
    engine.process(&request).unwrap();

    let meta = reader.read_metadata(&tagged).unwrap();
    assert_eq!(meta.get(MetadataField::Make), Some("Samsung"));
    assert_eq!(meta.get(MetadataField::Model), Some("SM-S928B"));
    assert_eq!(meta.get(MetadataField::CreationTime), Some("2024-07-01 10:00:00"));
    assert!(!meta.raw_tags.values().any(|v| v.contains("Apple") || v.contains("iPhone")), "{:?}", meta.raw_tags);

    let request = MetadataRequest::new(&input, &clean, MetadataSource::Strip).with_backend(BackendKind::Mp4Tags);
    assert!(engine.run(&request).success);

    let meta = reader.read_metadata(&clean).unwrap();
    assert!(!meta.has_identifying_fields(), "left behind: {:?}", meta.fields);
    assert!(meta.get(MetadataField::CreationTime).is_none());
}

#[test]
fn test_exiftool_apply_and_read() {
    let Some(tools) = media_tools() else { return };
    if !tools.has_exiftool() {
        eprintln!("exiftool not installed; skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.mov", &[]);
    let output = dir.path().join("out.mov");

    let request = MetadataRequest::new(&input, &output, MetadataSource::Profile("Sony Xperia 5 VI".to_string()))
        .with_date(CreationDate::parse("2024-07-01 10:00:00").unwrap());
    let result = engine(tools).process(&request).unwrap();
    assert_eq!(result.backend, Some(BackendKind::ExifTool));

    let meta = MetadataReader::new(tools).read_metadata(&output).unwrap();
    assert_eq!(meta.backend, ReaderBackend::ExifTool);
    assert_eq!(meta.get(MetadataField::Make), Some("Sony"));
    assert_eq!(meta.get(MetadataField::Model), Some("XQ-DQ74"));
    assert_eq!(meta.get(MetadataField::CreationTime), Some("2024-07-01 10:00:00"));
}

#[test]
fn test_explicit_backend_does_not_fall_back() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.mkv", &[]);
    let output = dir.path().join("out.mkv");

    let request = MetadataRequest::new(&input, &output, MetadataSource::Profile("Vivo X100 Pro".to_string()))
        .with_backend(BackendKind::Mp4Tags);
    let err = engine(tools).process(&request).unwrap_err();
    assert!(matches!(err, MetadataError::UnsupportedFormat(_)));
    assert!(!output.exists());
}

#[test]
fn test_failed_run_leaves_no_output() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.mp4");
    std::fs::write(&input, b"this is not a video").unwrap();
    let output = dir.path().join("out.mp4");

    let request = MetadataRequest::new(&input, &output, MetadataSource::Strip).with_backend(BackendKind::Ffmpeg);
    let result = engine(tools).run(&request);

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("ExternalToolFailure"));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_service_apply_then_read() {
    let Some(tools) = media_tools() else { return };
    let dir = TempDir::new().unwrap();
    let input = make_video(tools, dir.path(), "clip.mp4", &[]);
    let output = dir.path().join("clip_oppo.mp4");

    let service = MetadataService::new(engine(tools));
    let response = service
        .handle(request(
            "metadata.apply",
            json!({
                "input_path": input.to_str().unwrap(),
                "output_path": output.to_str().unwrap(),
                "custom_profile": {"make": "Oppo", "model": "CPH2511"},
                "backend": "ffmpeg"
            }),
        ))
        .await
        .unwrap();
    assert!(response.ok, "{}", response.output);
    assert_eq!(response.output["written"]["make"], "Oppo");

    let response = service
        .handle(request("metadata.read", json!({"input_path": output.to_str().unwrap()})))
        .await
        .unwrap();
    assert!(response.ok);
    assert_eq!(response.output["fields"]["model"], "CPH2511");
    assert_eq!(response.output["has_identifying_fields"], true);

    let snapshot = service.metrics().snapshot();
    assert_eq!(snapshot.successful_requests, 2);
    assert_eq!(snapshot.backends.ffmpeg, 1);
}

#[tokio::test]
async fn test_service_read_missing_file() {
    let service = MetadataService::new(engine(&Toolchain::default()));
    let response = service
        .handle(request("metadata.read", json!({"input_path": "/nonexistent/clip.mp4"})))
        .await
        .unwrap();

    assert!(!response.ok);
    assert_eq!(response.output["error_kind"], "InvalidInput");
}

#[tokio::test]
async fn test_all_function_names_match() {
    let service = MetadataService::new(engine(&Toolchain::default()));
    let card = service.describe();
    let names: Vec<&str> = card.functions.iter().map(|f| f.name.as_str()).collect();

    for op in [
        "metadata.apply",
        "metadata.strip",
        "metadata.read",
        "metadata.preview",
        "profiles.list",
        "profiles.show",
        "media.capabilities",
        "metrics",
    ] {
        assert!(names.contains(&op), "missing function card for {}", op);
    }
    assert!(card
        .functions
        .iter()
        .filter(|f| f.name.starts_with("metadata.") && f.name != "metadata.preview" && f.name != "metadata.read")
        .all(|f| f.side_effects.contains(&"writes video file".to_string())));
}

#[test]
fn test_custom_profile_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Pixel Clone.json");
    let store = ProfileStore::builtin();

    video_meta::save_profile(store.get_profile("Google Pixel 9 Pro").unwrap(), &path).unwrap();
    let loaded = video_meta::load_custom_profile(&path).unwrap();

    assert_eq!(loaded.name, "Pixel Clone");
    assert_eq!(loaded.attributes, store.get_profile("Google Pixel 9 Pro").unwrap().attributes);
}
