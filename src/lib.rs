//! video_meta - device metadata rewriting for video containers
//!
//! Rewrites or strips the tags that identify the recording device (make,
//! model, software, encoder, creation tool, creation date) without touching
//! the audio/video streams. Writing goes through one of three backends:
//! `ffmpeg` (stream copy), `exiftool`, or in-process MP4 tag editing.

pub mod backend;
mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fields;
pub mod format;
pub mod metadata;
pub mod metrics;
pub mod profiles;
pub mod service;
mod staging;
pub mod tools;
pub mod validation;

pub use backend::{BackendChoice, BackendKind, MetadataBackend, MetadataResult};
pub use command::{ToolCommand, ToolError};
pub use config::EngineConfig;
pub use engine::{MetadataEngine, MetadataRequest, MetadataSource};
pub use error::{MetadataError, Result};
pub use fields::{CreationDate, FieldMap, MetadataField, MetadataSet};
pub use format::{is_supported, validate_input_file, ContainerFormat, SUPPORTED_EXTENSIONS};
pub use metadata::{ContainerMetadata, FileInfo, MetadataReader, ReaderBackend};
pub use profiles::{load_custom_profile, save_profile, DeviceProfile, ProfileStore};
pub use tools::Toolchain;
