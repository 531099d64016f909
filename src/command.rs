//! External tool command wrapper utilities

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} not found in system PATH")]
    NotInstalled(String),

    #[error("{tool} execution failed: {stderr}")]
    ExecutionFailed { tool: String, stderr: String },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Argument builder for one invocation of an external binary.
///
/// Arguments are passed straight to the process, never through a shell.
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// ffmpeg-style `-i <path>`
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".into());
        self.args.push(path.as_ref().as_os_str().to_owned());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().as_os_str().to_owned());
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(OsString::from));
        self
    }

    pub fn args_owned(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args.into_iter().map(OsString::from));
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    pub fn execute(self) -> Result<Output, ToolError> {
        let tool = self.program_name();
        debug!("Executing: {} {}", self.program.display(), self.arg_strings().join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::NotInstalled(tool.clone()),
                _ => ToolError::ExecutionFailed {
                    tool: tool.clone(),
                    stderr: e.to_string(),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ToolError::ExecutionFailed {
                tool,
                stderr: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        Ok(output)
    }

    /// Run and parse stdout as JSON
    pub fn execute_json<T: serde::de::DeserializeOwned>(self) -> Result<T, ToolError> {
        let output = self.execute()?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ToolError::InvalidOutput(format!("JSON parse error: {}", e)))
    }
}
