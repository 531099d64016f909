use thiserror::Error;

use crate::command::ToolError;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid profile format: {0}")]
    InvalidProfileFormat(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("External tool failed: {0}")]
    ExternalToolFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// Stable name of the error kind, used in service responses
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataError::InvalidInput(_) => "InvalidInput",
            MetadataError::ProfileNotFound(_) => "ProfileNotFound",
            MetadataError::InvalidProfileFormat(_) => "InvalidProfileFormat",
            MetadataError::BackendUnavailable(_) => "BackendUnavailable",
            MetadataError::UnsupportedFormat(_) => "UnsupportedFormat",
            MetadataError::ExternalToolFailure(_) => "ExternalToolFailure",
            MetadataError::Io(_) => "Io",
        }
    }
}

impl From<ToolError> for MetadataError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotInstalled(tool) => {
                MetadataError::BackendUnavailable(format!("{} not found", tool))
            }
            other => MetadataError::ExternalToolFailure(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
