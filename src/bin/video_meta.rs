// video_meta - command line front end
// Rewrites or strips device metadata in video files without re-encoding

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use video_meta::service::{MediaService, MetadataService, ServiceRequest};
use video_meta::{
    load_custom_profile, save_profile, DeviceProfile, EngineConfig, MetadataEngine, ProfileStore,
    Toolchain,
};

#[derive(Parser)]
#[command(name = "video_meta", version, about = "Video metadata modifier - simulate device origin or strip metadata")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG and the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Path to the ffmpeg binary
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Path to the exiftool binary
    #[arg(long, global = true)]
    exiftool: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a device profile into a copy of a video
    Apply {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Creation date, YYYY-MM-DD HH:MM:SS
        #[arg(long)]
        custom_date: Option<String>,
        /// auto, ffmpeg, exiftool or mp4tags
        #[arg(long)]
        backend: Option<String>,
    },
    /// Copy a video with all metadata removed
    Strip {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        backend: Option<String>,
    },
    /// Print the metadata of a video as JSON
    Show { input: PathBuf },
    /// List built-in device profiles
    ListDevices,
    /// Save a built-in profile as a custom profile file
    SaveProfile {
        #[arg(long)]
        device: String,
        output: PathBuf,
    },
    /// Show the tags a profile would write
    Preview {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        custom_date: Option<String>,
    },
    /// Report which external tools were found
    Tools,
}

#[derive(ClapArgs)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Built-in device profile name
    #[arg(long)]
    device: Option<String>,
    /// Custom profile JSON file
    #[arg(long)]
    custom_profile: Option<PathBuf>,
}

impl SourceArgs {
    /// `device` or `custom_profile` keys of a service request
    fn to_input(&self) -> Result<Value> {
        match (&self.device, &self.custom_profile) {
            (Some(name), _) => Ok(json!({ "device": name })),
            (None, Some(path)) => {
                let profile = load_custom_profile(path)?;
                Ok(json!({ "custom_profile": profile.attributes }))
            }
            (None, None) => bail!("Either --device or --custom-profile is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &args.ffmpeg {
        config.ffmpeg_path = path.clone();
    }
    if let Some(path) = &args.exiftool {
        config.exiftool_path = path.clone();
    }

    // Initialize logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    debug!("Configuration: {:?}", config);

    match args.command {
        Command::Apply {
            input,
            output,
            source,
            custom_date,
            backend,
        } => {
            let mut request = source.to_input()?;
            request["input_path"] = json!(input.to_string_lossy());
            request["output_path"] = json!(output.to_string_lossy());
            if let Some(date) = custom_date {
                request["custom_date"] = json!(date);
            }
            if let Some(backend) = backend {
                request["backend"] = json!(backend);
            }
            let result = call(&writer_service(&config)?, "metadata.apply", request).await?;
            report(&result);
            Ok(())
        }
        Command::Strip { input, output, backend } => {
            let mut request = json!({
                "input_path": input.to_string_lossy(),
                "output_path": output.to_string_lossy(),
            });
            if let Some(backend) = backend {
                request["backend"] = json!(backend);
            }
            let result = call(&writer_service(&config)?, "metadata.strip", request).await?;
            report(&result);
            Ok(())
        }
        Command::Show { input } => {
            let metadata = call(
                &reader_service(&config),
                "metadata.read",
                json!({ "input_path": input.to_string_lossy() }),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            if metadata["has_identifying_fields"] == false {
                info!("No identifying metadata found");
            }
            Ok(())
        }
        Command::ListDevices => {
            let service = reader_service(&config);
            let listed = call(&service, "profiles.list", json!({})).await?;
            for name in listed["profiles"].as_array().into_iter().flatten().filter_map(Value::as_str) {
                let shown = call(&service, "profiles.show", json!({ "name": name })).await?;
                let profile: DeviceProfile = serde_json::from_value(shown)?;
                println!("{}", name);
                for line in profile.summary().lines() {
                    println!("    {}", line);
                }
            }
            Ok(())
        }
        Command::SaveProfile { device, output } => {
            let store = ProfileStore::builtin();
            save_profile(store.get_profile(&device)?, &output)?;
            println!("Saved '{}' to {}", device, output.display());
            Ok(())
        }
        Command::Preview { source, custom_date } => {
            let mut request = source.to_input()?;
            if let Some(date) = custom_date {
                request["custom_date"] = json!(date);
            }
            let preview = call(&reader_service(&config), "metadata.preview", request).await?;
            println!("{}", serde_json::to_string_pretty(&preview["fields"])?);
            Ok(())
        }
        Command::Tools => {
            let toolchain = Toolchain::probe(&config);
            println!("{}", serde_json::to_string_pretty(&toolchain)?);
            Ok(())
        }
    }
}

/// Service for operations that write files; needs ffmpeg
fn writer_service(config: &EngineConfig) -> Result<MetadataService> {
    let engine = MetadataEngine::from_config(config)?;
    Ok(MetadataService::new(engine).with_default_backend(config.default_backend))
}

/// Service for read-only operations; works with whatever tools are present
fn reader_service(config: &EngineConfig) -> MetadataService {
    let engine = MetadataEngine::new(Arc::new(ProfileStore::builtin()), Toolchain::probe(config));
    MetadataService::new(engine).with_default_backend(config.default_backend)
}

/// Run one operation, turning a failed response into an error
async fn call(service: &MetadataService, op: &str, input: Value) -> Result<Value> {
    let response = service
        .handle(ServiceRequest {
            op: op.to_string(),
            input,
            context: HashMap::new(),
        })
        .await?;
    debug!("{} took {} ms", op, response.latency_ms);

    if !response.ok {
        let message = response.output["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} failed", op));
        bail!("{}", message);
    }
    Ok(response.output)
}

fn report(result: &Value) {
    if let Some(backend) = result["backend"].as_str() {
        info!("Backend: {}", backend);
    }
    for field in result["skipped"].as_array().into_iter().flatten().filter_map(Value::as_str) {
        println!("Skipped: {}", field);
    }
    if let Some(path) = result["output_path"].as_str() {
        println!("Output file: {}", path);
    }
}
