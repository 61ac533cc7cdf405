//! Error handling for the ALMAZ COD installer

use thiserror::Error;

/// Main error type for installer operations
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Extraction error: {message}")]
    Extraction { message: String },

    #[error("Failed to patch {file}: {message}")]
    Patch { file: String, message: String },

    #[error("Download error: {message}")]
    Download { message: String },

    #[error("Installation failed: {message}")]
    Install { message: String },

    #[error("Path validation error: {path}")]
    InvalidPath { path: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

impl InstallerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    pub fn patch(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Patch {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    pub fn install(message: impl Into<String>) -> Self {
        Self::Install {
            message: message.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
