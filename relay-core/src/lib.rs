//! Relay Core Library
//!
//! Local reverse proxy that lets a remote project-generation form run inside
//! an embedded panel. Traffic is forwarded to the remote origin with framing
//! restrictions stripped; the generated-archive download is intercepted and
//! turned into a local extract-and-open workflow.

pub mod admin;
pub mod archive;
pub mod controller;
pub mod extraction;
pub mod forward;
pub mod headers;
pub mod jobs;
pub mod logging;
pub mod settings;
/// Core relay server
pub mod relay;

/// Configuration types and utilities
pub mod config;

/// Request routing rules
pub mod policy;

/// Error types for relay operations
pub mod error;

pub use admin::{MetricsSnapshot, RelayMetrics};
pub use archive::HttpArchiveFetcher;
pub use config::{EmbedMode, PanelConfig, RelayConfig};
pub use controller::{PanelController, PanelHandle, PanelHost, PanelView, ViewOptions};
pub use error::{ExtractionError, RelayError};
pub use extraction::{
    ArchiveFetcher, ExtractionJob, ExtractionWorkflow, FolderPicker, Notifier, WorkflowDeps,
    WorkspaceOpener,
};
pub use jobs::{ExtractionQueue, JobOutcome, JobStatus};
pub use logging::{init_logging, LoggingConfig};
pub use policy::{RouteAction, RoutePolicy, RouteRule, RuleCondition};
/// Re-export commonly used types
pub use relay::{BoundRelay, RelayServer};
pub use settings::{MapSettings, SettingsStore};

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
