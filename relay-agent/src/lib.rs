//! Relay Agent
//!
//! Runs the relay from a terminal: loads configuration, wires the host
//! collaborators into `relay-core` and serves until interrupted.

use anyhow::Context;
use clap::Parser;
use relay_core::{
    config::PROJECTS_FOLDER_KEY, init_logging, EmbedMode, ExtractionQueue, ExtractionWorkflow,
    FolderPicker, HttpArchiveFetcher, JobStatus, MapSettings, Notifier, PanelController,
    RelayConfig, RelayMetrics, RelayServer, WorkflowDeps,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub mod collaborators;

use collaborators::{
    BrowserPanelHost, DialogFolderPicker, DialogNotifier, LogNotifier, PromptFolderPicker,
    SystemOpener,
};

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address the relay listens on
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Port the relay listens on (default 7654)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Origin of the project-generation service
    #[arg(long)]
    pub remote_origin: Option<String>,

    /// Default extraction folder (`~`, `{TMP}` and blank are understood)
    #[arg(long)]
    pub projects_folder: Option<String>,

    /// Port to expose the Admin API (health/metrics)
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// Panel embed mode: `relayed` or `directEmbed`
    #[arg(long)]
    pub mode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Directory holding the panel's bundled assets (defaults to the ones
    /// shipped with the agent)
    #[arg(long)]
    pub extension_root: Option<PathBuf>,

    /// Command used to open extracted projects, e.g. `code --new-window`
    #[arg(long)]
    pub open_with: Option<String>,

    /// Do not open the panel page in a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Ask for folders and report errors on the terminal instead of dialogs
    #[arg(long)]
    pub no_gui: bool,
}

/// How the extraction workflow talks to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Native folder chooser and message boxes
    Dialogs,
    /// stdin prompt and stderr messages
    Terminal,
}

impl Interaction {
    pub fn collaborators(self) -> (Arc<dyn FolderPicker>, Arc<dyn Notifier>) {
        match self {
            Interaction::Dialogs => (Arc::new(DialogFolderPicker), Arc::new(DialogNotifier)),
            Interaction::Terminal => (Arc::new(PromptFolderPicker::stdin()), Arc::new(LogNotifier)),
        }
    }
}

impl Args {
    pub fn interaction(&self) -> Interaction {
        if self.no_gui {
            Interaction::Terminal
        } else {
            Interaction::Dialogs
        }
    }

    pub fn extension_root(&self) -> PathBuf {
        self.extension_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
    }
}

/// Build the relay configuration: file values first, then flag overrides.
pub fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.listen_address = addr.clone();
    }
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(origin) = &args.remote_origin {
        config.remote_origin = origin.clone();
    }
    if let Some(folder) = &args.projects_folder {
        config
            .settings
            .insert(PROJECTS_FOLDER_KEY.to_string(), folder.clone());
    }
    if let Some(port) = args.admin_port {
        config.admin_port = Some(port);
    }
    if let Some(mode) = &args.mode {
        config.panel.mode = mode.parse::<EmbedMode>()?;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Run the relay until it fails or Ctrl-C arrives, then close the panel.
pub async fn run_relay(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    init_logging(&config.logging)?;

    tracing::info!("Starting Relay Agent...");
    tracing::info!("  Listen: {}:{}", config.listen_address, config.listen_port);
    tracing::info!("  Remote: {}", config.remote_origin);
    tracing::info!("  Mode:   {:?}", config.panel.mode);
    if let Some(port) = config.admin_port {
        tracing::info!("  Admin:  127.0.0.1:{}", port);
    }

    let metrics = Arc::new(RelayMetrics::default());
    let interaction = args.interaction();
    tracing::info!("  Dialogs: {:?}", interaction);
    let (picker, notifier) = interaction.collaborators();
    let workflow = ExtractionWorkflow::new(WorkflowDeps {
        settings: Arc::new(MapSettings::new(config.settings.clone())),
        picker,
        fetcher: Arc::new(HttpArchiveFetcher::new()?),
        opener: Arc::new(SystemOpener::new(args.open_with.clone())),
        notifier,
    });
    let (queue, _worker) = ExtractionQueue::spawn(workflow, metrics.clone());

    let mut outcomes = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match outcomes.recv().await {
                Ok(outcome) => match outcome.status {
                    JobStatus::Completed(path) => {
                        tracing::info!(
                            "Project {} ready at {}",
                            outcome.project_name,
                            path.display()
                        )
                    }
                    JobStatus::Cancelled => {
                        tracing::info!("Extraction of {} cancelled", outcome.project_name)
                    }
                    JobStatus::Conflict => {
                        tracing::info!(
                            "Extraction of {} skipped, folder exists",
                            outcome.project_name
                        )
                    }
                    JobStatus::Failed(reason) => {
                        tracing::warn!(
                            "Extraction of {} failed: {}",
                            outcome.project_name,
                            reason
                        )
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} extraction outcomes", missed)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let host = BrowserPanelHost::new(args.extension_root(), !args.no_browser);
    let extension_root = host.extension_root().display().to_string();
    let panel = Arc::new(PanelController::new(
        Arc::new(host),
        config.panel.clone(),
        config.local_origin(),
        config.remote_origin_trimmed(),
        extension_root,
    ));

    let relay = RelayServer::new(config, panel.clone(), queue, metrics)?
        .bind()
        .await?;
    panel.show_or_create();

    let result = tokio::select! {
        result = relay.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping relay...");
            Ok(())
        }
    };
    panel.hide();
    result.map_err(Into::into)
}
