//! Service Interface for video_meta
//!
//! Exposes the engine as JSON-addressable operations so an orchestrator can
//! discover and invoke them without linking against the Rust types.
//!
//! ## Request/Response Pattern
//!
//! - Every call is a [`ServiceRequest`] (`op` + JSON `input`)
//! - Input is checked against the operation's schema before dispatch
//! - Engine and reader calls run on tokio's blocking pool
//! - Latency and per-backend usage are tracked in [`Metrics`]
//!
//! ## Available Operations
//!
//! 1. `metadata.apply` - Write a device profile into a copy of a video
//! 2. `metadata.strip` - Copy a video with all metadata removed
//! 3. `metadata.read` - Read metadata back from a video
//! 4. `metadata.preview` - Resolve a profile without touching any file
//! 5. `profiles.list` - Built-in device profile names
//! 6. `profiles.show` - One built-in profile
//! 7. `media.capabilities` - Capability card query
//! 8. `metrics` - Metrics snapshot
//!
//! ## Example
//!
//! ```rust,no_run
//! use video_meta::service::{MediaService, MetadataService, ServiceRequest};
//! use video_meta::{EngineConfig, MetadataEngine};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = MetadataEngine::from_config(&EngineConfig::default())?;
//! let service = MetadataService::new(engine);
//!
//! let response = service.handle(ServiceRequest {
//!     op: "metadata.apply".to_string(),
//!     input: json!({
//!         "input_path": "clip.mp4",
//!         "output_path": "clip_pixel.mp4",
//!         "device": "Google Pixel 9 Pro"
//!     }),
//!     context: HashMap::new(),
//! }).await?;
//! println!("{}", response.output);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::backend::{BackendChoice, BackendKind, MetadataResult};
use crate::engine::{MetadataEngine, MetadataRequest, MetadataSource};
use crate::error::MetadataError;
use crate::fields::{CreationDate, MetadataField};
use crate::metadata::MetadataReader;
use crate::metrics::{Metrics, Timer};
use crate::profiles::parse_custom_profile;
use crate::validation::validate_input;

const OPERATIONS: &[&str] = &[
    "metadata.apply",
    "metadata.strip",
    "metadata.read",
    "metadata.preview",
    "profiles.list",
    "profiles.show",
    "media.capabilities",
    "metrics",
];

/// Service request - one operation invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Service response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
}

#[async_trait]
pub trait MediaService: Send + Sync {
    async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse, ServiceError>;
    fn describe(&self) -> CapabilityCard;
}

/// Service-level errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),
}

/// Service capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Backends usable on this host
    pub backends: Vec<BackendKind>,
    pub functions: Vec<FunctionCard>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Value,
}

/// Handler output before it is wrapped into a response
struct Handled {
    ok: bool,
    output: Value,
}

impl Handled {
    fn ok(output: Value) -> Self {
        Self { ok: true, output }
    }

    fn from_result(result: &MetadataResult) -> Result<Self, ServiceError> {
        Ok(Self {
            ok: result.success,
            output: serde_json::to_value(result)?,
        })
    }
}

/// Video Metadata Service
pub struct MetadataService {
    engine: Arc<MetadataEngine>,
    reader: Arc<MetadataReader>,
    metrics: Arc<Metrics>,
    default_backend: BackendChoice,
}

impl MetadataService {
    pub fn new(engine: MetadataEngine) -> Self {
        Self::with_metrics(engine, Metrics::new())
    }

    pub fn with_metrics(engine: MetadataEngine, metrics: Arc<Metrics>) -> Self {
        let reader = MetadataReader::new(engine.toolchain());
        Self {
            engine: Arc::new(engine),
            reader: Arc::new(reader),
            metrics,
            default_backend: BackendChoice::Auto,
        }
    }

    /// Backend used when a request has no `backend` key
    pub fn with_default_backend(mut self, backend: BackendChoice) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    async fn dispatch(&self, op: &str, input: Value) -> Result<Handled, ServiceError> {
        let card = self.describe();
        let function = card
            .functions
            .iter()
            .find(|f| f.name == op)
            .ok_or_else(|| ServiceError::UnsupportedOperation(op.to_string()))?;
        validate_input(&input, &function.input_schema)?;

        match op {
            "metadata.apply" => self.handle_apply(&input).await,
            "metadata.strip" => self.handle_strip(&input).await,
            "metadata.read" => self.handle_read(&input).await,
            "metadata.preview" => self.handle_preview(&input),
            "profiles.list" => Ok(Handled::ok(json!({
                "profiles": self.engine.profiles().list_profiles()
            }))),
            "profiles.show" => {
                let name = str_field(&input, "name")?;
                let profile = self.engine.profiles().get_profile(name)?;
                Ok(Handled::ok(serde_json::to_value(profile)?))
            }
            "media.capabilities" => Ok(Handled::ok(serde_json::to_value(&card)?)),
            "metrics" => Ok(Handled::ok(json!(self.metrics.snapshot()))),
            other => Err(ServiceError::UnsupportedOperation(other.to_string())),
        }
    }

    /// Handle metadata.apply operation
    async fn handle_apply(&self, input: &Value) -> Result<Handled, ServiceError> {
        let source = source_from_input(input)?.ok_or_else(|| {
            MetadataError::InvalidInput("Either device or custom_profile is required".to_string())
        })?;
        let mut request = self.request_from_input(input, source)?;
        if let Some(date) = opt_str_field(input, "custom_date") {
            request = request.with_date(CreationDate::parse(date)?);
        }
        self.run_request(request).await
    }

    /// Handle metadata.strip operation
    async fn handle_strip(&self, input: &Value) -> Result<Handled, ServiceError> {
        let request = self.request_from_input(input, MetadataSource::Strip)?;
        self.run_request(request).await
    }

    /// Handle metadata.read operation
    async fn handle_read(&self, input: &Value) -> Result<Handled, ServiceError> {
        let path = PathBuf::from(str_field(input, "input_path")?);
        let reader = Arc::clone(&self.reader);

        let metadata = tokio::task::spawn_blocking(move || reader.read_metadata(&path))
            .await
            .map_err(|e| ServiceError::TaskFailed(e.to_string()))??;

        let mut output = serde_json::to_value(&metadata)?;
        output["has_identifying_fields"] = json!(metadata.has_identifying_fields());
        Ok(Handled::ok(output))
    }

    /// Handle metadata.preview operation
    fn handle_preview(&self, input: &Value) -> Result<Handled, ServiceError> {
        let source = source_from_input(input)?.unwrap_or(MetadataSource::Strip);
        let date = opt_str_field(input, "custom_date")
            .map(CreationDate::parse)
            .transpose()?;

        let strip = matches!(source, MetadataSource::Strip);
        let set = self.engine.preview(&source, date)?;
        Ok(Handled::ok(json!({
            "fields": set.to_field_map(),
            "strip": strip,
        })))
    }

    fn request_from_input(&self, input: &Value, source: MetadataSource) -> Result<MetadataRequest, ServiceError> {
        let backend = match opt_str_field(input, "backend") {
            Some(name) => name.parse()?,
            None => self.default_backend,
        };
        Ok(MetadataRequest::new(
            str_field(input, "input_path")?,
            str_field(input, "output_path")?,
            source,
        )
        .with_backend(backend))
    }

    async fn run_request(&self, request: MetadataRequest) -> Result<Handled, ServiceError> {
        let engine = Arc::clone(&self.engine);
        let result = tokio::task::spawn_blocking(move || engine.run(&request))
            .await
            .map_err(|e| ServiceError::TaskFailed(e.to_string()))?;

        if let Some(backend) = result.backend {
            self.metrics.record_backend(backend);
        }
        Handled::from_result(&result)
    }
}

#[async_trait]
impl MediaService for MetadataService {
    async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        let timer = Timer::new();
        let op = request.op.clone();
        debug!("Service request: {}", op);

        let handled = match self.dispatch(&op, request.input).await {
            Ok(handled) => handled,
            Err(ServiceError::UnsupportedOperation(_)) => Handled {
                ok: false,
                output: json!({
                    "error": "UnsupportedOperation",
                    "op": op,
                    "available_operations": OPERATIONS,
                }),
            },
            Err(ServiceError::Metadata(e)) => Handled {
                ok: false,
                output: json!({ "error": e.to_string(), "error_kind": e.kind() }),
            },
            Err(ServiceError::Serialization(e)) => Handled {
                ok: false,
                output: json!({ "error": e.to_string(), "error_kind": "Serialization" }),
            },
            Err(e @ ServiceError::TaskFailed(_)) => {
                self.metrics.record_request(&op, false, timer.elapsed_ms());
                return Err(e);
            }
        };

        let latency = timer.elapsed_ms();
        self.metrics.record_request(&op, handled.ok, latency);

        Ok(ServiceResponse {
            ok: handled.ok,
            output: handled.output,
            latency_ms: latency,
        })
    }

    fn describe(&self) -> CapabilityCard {
        let backend_names: Vec<&str> = ["auto"]
            .into_iter()
            .chain(BackendKind::ALL.iter().map(|b| b.as_str()))
            .collect();
        let field_names: Vec<&str> = MetadataField::ALL.iter().map(|f| f.as_str()).collect();

        let custom_profile = json!({
            "type": "object",
            "description": format!("Custom profile; keys from {:?}", field_names)
        });
        let write_side_effects = vec!["writes video file".to_string(), "invokes external tool".to_string()];

        CapabilityCard {
            name: "video_meta".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Rewrites or strips device metadata in video containers without re-encoding".to_string(),
            tags: vec![
                "video".to_string(),
                "metadata".to_string(),
                "ffmpeg".to_string(),
                "exiftool".to_string(),
                "mp4".to_string(),
            ],
            backends: self.engine.available_backends(),
            functions: vec![
                FunctionCard {
                    name: "metadata.apply".to_string(),
                    description: "Write a built-in or custom device profile into a copy of a video".to_string(),
                    idempotent: true,
                    side_effects: write_side_effects.clone(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "input_path": { "type": "string", "description": "Source video" },
                            "output_path": { "type": "string", "description": "Destination video" },
                            "device": { "type": "string", "description": "Built-in profile name" },
                            "custom_profile": custom_profile,
                            "custom_date": { "type": "string", "description": "YYYY-MM-DD HH:MM:SS" },
                            "backend": { "type": "string", "enum": backend_names }
                        },
                        "required": ["input_path", "output_path"],
                        "additionalProperties": false
                    }),
                },
                FunctionCard {
                    name: "metadata.strip".to_string(),
                    description: "Copy a video with all container metadata removed".to_string(),
                    idempotent: true,
                    side_effects: write_side_effects,
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "input_path": { "type": "string" },
                            "output_path": { "type": "string" },
                            "backend": { "type": "string", "enum": backend_names }
                        },
                        "required": ["input_path", "output_path"],
                        "additionalProperties": false
                    }),
                },
                FunctionCard {
                    name: "metadata.read".to_string(),
                    description: "Read container metadata with exiftool or ffprobe".to_string(),
                    idempotent: true,
                    side_effects: vec!["invokes external tool".to_string()],
                    input_schema: json!({
                        "type": "object",
                        "properties": { "input_path": { "type": "string" } },
                        "required": ["input_path"],
                        "additionalProperties": false
                    }),
                },
                FunctionCard {
                    name: "metadata.preview".to_string(),
                    description: "Show the tags a request would write, without touching any file".to_string(),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "device": { "type": "string" },
                            "custom_profile": custom_profile,
                            "custom_date": { "type": "string" }
                        },
                        "additionalProperties": false
                    }),
                },
                FunctionCard {
                    name: "profiles.list".to_string(),
                    description: "List built-in device profile names".to_string(),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: json!({ "type": "object", "additionalProperties": false }),
                },
                FunctionCard {
                    name: "profiles.show".to_string(),
                    description: "Show one built-in device profile".to_string(),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: json!({
                        "type": "object",
                        "properties": { "name": { "type": "string" } },
                        "required": ["name"],
                        "additionalProperties": false
                    }),
                },
                FunctionCard {
                    name: "media.capabilities".to_string(),
                    description: "Return this capability card".to_string(),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: json!({ "type": "object" }),
                },
                FunctionCard {
                    name: "metrics".to_string(),
                    description: "Request counters, latency and backend usage".to_string(),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: json!({ "type": "object" }),
                },
            ],
        }
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> Result<&'a str, MetadataError> {
    input[key]
        .as_str()
        .ok_or_else(|| MetadataError::InvalidInput(format!("Missing {}", key)))
}

fn opt_str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// `device` or `custom_profile`, never both
fn source_from_input(input: &Value) -> Result<Option<MetadataSource>, MetadataError> {
    match (opt_str_field(input, "device"), input.get("custom_profile")) {
        (Some(_), Some(_)) => Err(MetadataError::InvalidInput(
            "device and custom_profile are mutually exclusive".to_string(),
        )),
        (Some(name), None) => Ok(Some(MetadataSource::Profile(name.to_string()))),
        (None, Some(profile)) => {
            let profile = parse_custom_profile("Custom Profile", &profile.to_string())?;
            Ok(Some(MetadataSource::Custom(profile)))
        }
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileStore;
    use crate::tools::Toolchain;

    fn service() -> MetadataService {
        let toolchain = Toolchain {
            ffmpeg: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ffprobe: None,
            exiftool: None,
        };
        MetadataService::new(MetadataEngine::new(Arc::new(ProfileStore::builtin()), toolchain))
    }

    fn request(op: &str, input: Value) -> ServiceRequest {
        ServiceRequest {
            op: op.to_string(),
            input,
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_capabilities() {
        let response = service()
            .handle(request("media.capabilities", json!({})))
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.output["name"], "video_meta");
        assert_eq!(response.output["functions"].as_array().unwrap().len(), OPERATIONS.len());
        assert_eq!(response.output["backends"], json!(["ffmpeg", "mp4tags"]));
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let service = service();
        let response = service.handle(request("video.transcode", json!({}))).await.unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error"], "UnsupportedOperation");
        assert_eq!(service.metrics().snapshot().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_profiles_list_and_show() {
        let service = service();
        let response = service.handle(request("profiles.list", json!({}))).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.output["profiles"][1], "Samsung Galaxy S24 Ultra");

        let response = service
            .handle(request("profiles.show", json!({"name": "OnePlus Open"})))
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.output["attributes"]["model"], "CPH2517");

        let response = service
            .handle(request("profiles.show", json!({"name": "oneplus open"})))
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error_kind"], "ProfileNotFound");
    }

    #[tokio::test]
    async fn test_schema_rejects_bad_input() {
        let service = service();
        let response = service
            .handle(request("metadata.apply", json!({"input_path": "a.mp4"})))
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.output["error_kind"], "InvalidInput");

        let response = service
            .handle(request(
                "metadata.strip",
                json!({"input_path": "a.mp4", "output_path": "b.mp4", "backend": "vlc"}),
            ))
            .await
            .unwrap();
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn test_preview_custom_profile() {
        let response = service()
            .handle(request(
                "metadata.preview",
                json!({
                    "custom_profile": {"make": "Acme", "model": "Cam 1"},
                    "custom_date": "2022-02-02 02:02:02"
                }),
            ))
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.output["fields"]["make"], "Acme");
        assert_eq!(response.output["fields"]["creation_time"], "2022-02-02 02:02:02");
        assert_eq!(response.output["strip"], false);
    }

    #[tokio::test]
    async fn test_apply_failure_counts_backend() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"placeholder").unwrap();
        let output = dir.path().join("out.mp4");

        let service = service();
        let response = service
            .handle(request(
                "metadata.apply",
                json!({
                    "input_path": input.to_str().unwrap(),
                    "output_path": output.to_str().unwrap(),
                    "device": "Xiaomi 15",
                    "backend": "ffmpeg"
                }),
            ))
            .await
            .unwrap();

        assert!(!response.ok);
        assert_eq!(response.output["backend"], "ffmpeg");
        assert_eq!(response.output["error_kind"], "BackendUnavailable");
        assert!(!output.exists());

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.backends.ffmpeg, 1);
        assert_eq!(snapshot.operations.metadata_apply, 1);
    }
}
