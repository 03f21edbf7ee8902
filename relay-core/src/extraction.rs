//! Extraction workflow for intercepted archive downloads.
//!
//! A job is created when the relay intercepts the archive download. The
//! workflow asks the user where to put the project, refuses to overwrite an
//! existing project directory, downloads and unpacks the archive, then asks
//! the host to open the new project in its own window.

use crate::config::PROJECTS_FOLDER_KEY;
use crate::error::ExtractionError;
use crate::jobs::DestinationLocks;
use crate::settings::{resolve_base_dir, SettingsStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Native directory picker.
#[async_trait]
pub trait FolderPicker: Send + Sync {
    /// Returns the chosen directory, or `None` when the user cancels.
    async fn pick_folder(&self, default_dir: &Path, title: &str) -> Option<PathBuf>;
}

/// Downloads an archive and unpacks it into a directory.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch_and_extract(&self, url: &str, destination: &Path) -> Result<(), ExtractionError>;
}

/// Opens a directory as a new host workspace window.
#[async_trait]
pub trait WorkspaceOpener: Send + Sync {
    async fn open_as_new_window(&self, path: &Path);
}

/// User-visible messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn error(&self, message: &str);
}

/// One intercepted archive download.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub project_name: String,
    /// Remote origin followed by the original path and query
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn new(project_name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: project_name.into(),
            source_url: source_url.into(),
            created_at: Utc::now(),
        }
    }

    pub fn dialog_title(&self) -> String {
        format!("Extract project {} to Folder", self.project_name)
    }
}

/// Pull the project name out of a raw query string.
///
/// Returns the decoded value of the first `key` parameter. Missing, empty
/// and blank values yield `None`, as do values that cannot name a single
/// directory (`.`, `..`, or anything containing a path separator).
pub fn project_name_from_query(query: &str, key: &str) -> Option<String> {
    let value = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())?;

    if value.trim().is_empty() || !is_plain_dir_name(&value) {
        return None;
    }
    Some(value)
}

fn is_plain_dir_name(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Collaborators the workflow drives.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub picker: Arc<dyn FolderPicker>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub opener: Arc<dyn WorkspaceOpener>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct ExtractionWorkflow {
    deps: WorkflowDeps,
    locks: DestinationLocks,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

impl ExtractionWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self {
            deps,
            locks: DestinationLocks::default(),
            home_dir: dirs::home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Override the directories used to expand `~` and `{TMP}`.
    pub fn with_dirs(mut self, home_dir: Option<PathBuf>, temp_dir: PathBuf) -> Self {
        self.home_dir = home_dir;
        self.temp_dir = temp_dir;
        self
    }

    /// Folder the picker opens on, from the `projects-folder` setting.
    pub fn default_folder(&self) -> PathBuf {
        let configured = self.deps.settings.get_string(PROJECTS_FOLDER_KEY);
        resolve_base_dir(configured.as_deref(), self.home_dir.as_deref(), &self.temp_dir)
    }

    /// Run one job to completion. Returns the new project directory.
    pub async fn run(&self, job: &ExtractionJob) -> Result<PathBuf, ExtractionError> {
        if !is_plain_dir_name(&job.project_name) {
            return Err(ExtractionError::InvalidProjectName(job.project_name.clone()));
        }

        let default_dir = self.default_folder();
        debug!(
            "Job [{}] offering {} for project {}",
            job.id,
            default_dir.display(),
            job.project_name
        );

        let destination = self
            .deps
            .picker
            .pick_folder(&default_dir, &job.dialog_title())
            .await
            .ok_or(ExtractionError::Cancelled)?;

        let project_dir = destination.join(&job.project_name);

        // Held from the existence check until the archive is unpacked.
        let lock = self.locks.lock_for(&project_dir);
        let extracted = {
            let _guard = lock.lock().await;
            self.extract_into(job, &destination, &project_dir).await
        };
        drop(lock);
        self.locks.release(&project_dir);
        extracted?;

        self.deps.opener.open_as_new_window(&project_dir).await;
        Ok(project_dir)
    }

    async fn extract_into(
        &self,
        job: &ExtractionJob,
        destination: &Path,
        project_dir: &Path,
    ) -> Result<(), ExtractionError> {
        if tokio::fs::try_exists(project_dir).await.unwrap_or(true) {
            let err = ExtractionError::Conflict {
                project_name: job.project_name.clone(),
                destination: destination.to_path_buf(),
            };
            self.deps.notifier.error(&err.to_string()).await;
            return Err(err);
        }

        info!(
            "Job [{}] extracting {} into {}",
            job.id,
            job.source_url,
            destination.display()
        );
        if let Err(e) = self
            .deps
            .fetcher
            .fetch_and_extract(&job.source_url, destination)
            .await
        {
            warn!("Job [{}] fetch/unpack failed: {}", job.id, e);
            return Err(e);
        }
        Ok(())
    }
}
