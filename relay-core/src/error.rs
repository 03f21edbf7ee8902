//! Error types for relay operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Listener or socket level failures
    #[error("Network error: {0}")]
    Network(String),
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The extraction queue is gone or refused a job
    #[error("Extraction error: {0}")]
    Extraction(String),
    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure modes of a single extraction job.
///
/// `Cancelled` and `Conflict` are expected outcomes rather than faults; the
/// queue reports them separately from real failures.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The user dismissed the folder picker
    #[error("folder selection cancelled")]
    Cancelled,
    /// A directory with the project name already exists in the destination
    #[error("Project {project_name} folder already exists in {}", destination.display())]
    Conflict {
        project_name: String,
        destination: PathBuf,
    },
    /// The project name cannot be used as a directory name
    #[error("invalid project name: {0:?}")]
    InvalidProjectName(String),
    /// Downloading the archive failed
    #[error("archive download failed: {0}")]
    Fetch(String),
    /// The archive could not be unpacked
    #[error("archive extraction failed: {0}")]
    Unpack(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        ExtractionError::Fetch(err.to_string())
    }
}

impl From<zip::result::ZipError> for ExtractionError {
    fn from(err: zip::result::ZipError) -> Self {
        ExtractionError::Unpack(err.to_string())
    }
}
