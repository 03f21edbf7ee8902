//! Host collaborators: native dialogs by default, a terminal prompt for
//! headless runs, and a browser page standing in for the panel.

use async_trait::async_trait;
use relay_core::settings::resolve_base_dir_for_user;
use relay_core::{FolderPicker, Notifier, PanelHost, PanelView, ViewOptions, WorkspaceOpener};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Open `target` with the platform's default handler.
pub fn open_with_system(target: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut command = Command::new("open");
        command.arg(target);
        command
    };

    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(target);
        command
    };

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut command = Command::new("xdg-open");
        command.arg(target);
        command
    };

    spawn_detached(&mut command).map(|_| ())
}

/// Start `command` without waiting for it. A background thread collects
/// the exit status so finished launchers do not linger as zombies.
fn spawn_detached(command: &mut Command) -> std::io::Result<std::thread::JoinHandle<()>> {
    let child = command.spawn()?;
    Ok(std::thread::spawn(move || reap(child)))
}

fn reap(mut child: Child) {
    let pid = child.id();
    match child.wait() {
        Ok(status) => debug!("Launcher {} exited with {}", pid, status),
        Err(e) => warn!("Failed to wait for launcher {}: {}", pid, e),
    }
}

/// Native folder chooser.
///
/// Opens in the offered default folder; dismissing the dialog cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogFolderPicker;

#[async_trait]
impl FolderPicker for DialogFolderPicker {
    async fn pick_folder(&self, default_dir: &Path, title: &str) -> Option<PathBuf> {
        let default_dir = default_dir.to_path_buf();
        let title = title.to_string();
        let picked = tokio::task::spawn_blocking(move || {
            rfd::FileDialog::new()
                .set_title(title)
                .set_directory(&default_dir)
                .pick_folder()
        })
        .await;

        match picked {
            Ok(folder) => folder,
            Err(e) => {
                warn!("Folder dialog failed: {}", e);
                None
            }
        }
    }
}

/// Shows user-facing errors in a native message box.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogNotifier;

#[async_trait]
impl Notifier for DialogNotifier {
    async fn error(&self, message: &str) {
        error!("{}", message);
        let description = message.to_string();
        let shown = tokio::task::spawn_blocking(move || {
            rfd::MessageDialog::new()
                .set_level(rfd::MessageLevel::Error)
                .set_title("Spring Initializr")
                .set_description(description)
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
        })
        .await;
        if let Err(e) = shown {
            warn!("Error dialog failed: {}", e);
        }
    }
}

/// Asks for the destination folder on the terminal, for `--no-gui` runs.
///
/// An empty answer accepts the offered default, `q` (or end of input)
/// cancels. Answers may start with `~` or `{TMP}`. Concurrent jobs take
/// turns at the prompt.
pub struct PromptFolderPicker<R = BufReader<Stdin>> {
    input: Mutex<R>,
}

impl PromptFolderPicker {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl PromptFolderPicker<Cursor<Vec<u8>>> {
    /// Picker fed from canned answers.
    pub fn scripted(answers: &str) -> Self {
        Self::from_reader(Cursor::new(answers.as_bytes().to_vec()))
    }
}

impl<R> PromptFolderPicker<R> {
    pub fn from_reader(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R> FolderPicker for PromptFolderPicker<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn pick_folder(&self, default_dir: &Path, title: &str) -> Option<PathBuf> {
        let mut input = self.input.lock().await;
        eprintln!("{}", title);
        eprintln!(
            "Extract into [{}] (Enter to accept, q to cancel): ",
            default_dir.display()
        );

        let mut line = String::new();
        match input.read_line(&mut line).await {
            Ok(0) => {
                warn!("Input closed, treating the folder prompt as cancelled");
                None
            }
            Ok(_) => parse_answer(&line, default_dir),
            Err(e) => {
                warn!("Failed to read folder answer: {}", e);
                None
            }
        }
    }
}

fn parse_answer(line: &str, default_dir: &Path) -> Option<PathBuf> {
    match line.trim() {
        "" => Some(default_dir.to_path_buf()),
        "q" | "Q" => None,
        answer => Some(resolve_base_dir_for_user(Some(answer))),
    }
}

/// Opens a finished project, either with a configured command or with
/// the platform's default handler.
#[derive(Debug, Clone, Default)]
pub struct SystemOpener {
    command: Option<String>,
}

impl SystemOpener {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    fn launch(&self, path: &Path) -> std::io::Result<()> {
        match &self.command {
            Some(command) => {
                let mut parts = command.split_whitespace();
                let program = parts.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty open command")
                })?;
                spawn_detached(Command::new(program).args(parts).arg(path))?;
                Ok(())
            }
            None => open_with_system(path),
        }
    }
}

#[async_trait]
impl WorkspaceOpener for SystemOpener {
    async fn open_as_new_window(&self, path: &Path) {
        info!("Opening {}", path.display());
        if let Err(e) = self.launch(path) {
            warn!("Failed to open {}: {}", path.display(), e);
        }
    }
}

/// Reports user-facing errors on stderr, for `--no-gui` runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn error(&self, message: &str) {
        error!("{}", message);
        eprintln!("error: {}", message);
    }
}

/// Shows the panel as a local HTML page in the default browser.
#[derive(Debug, Clone)]
pub struct BrowserPanelHost {
    extension_root: PathBuf,
    page_dir: PathBuf,
    open_browser: bool,
}

impl BrowserPanelHost {
    /// A relative `extension_root` is taken from the current directory.
    pub fn new(extension_root: impl Into<PathBuf>, open_browser: bool) -> Self {
        Self {
            extension_root: absolute(extension_root.into()),
            page_dir: std::env::temp_dir(),
            open_browser,
        }
    }

    pub fn extension_root(&self) -> &Path {
        &self.extension_root
    }

    /// Write panel pages under `dir` instead of the system temp directory.
    pub fn with_page_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.page_dir = dir.into();
        self
    }
}

impl PanelHost for BrowserPanelHost {
    fn create_view(&self, options: ViewOptions) -> Box<dyn PanelView> {
        let page = self
            .page_dir
            .join(format!("{}-{}.html", options.view_type, uuid::Uuid::new_v4()));
        debug!("Panel page {}", page.display());
        Box::new(BrowserView {
            page,
            extension_root: self.extension_root.clone(),
            open_browser: self.open_browser,
            opened: AtomicBool::new(false),
        })
    }
}

/// One panel page on disk.
struct BrowserView {
    page: PathBuf,
    extension_root: PathBuf,
    open_browser: bool,
    opened: AtomicBool,
}

impl BrowserView {
    fn open_page(&self) {
        if !self.open_browser {
            return;
        }
        if let Err(e) = open_with_system(&self.page) {
            warn!("Failed to open panel page: {}", e);
        }
    }
}

impl PanelView for BrowserView {
    fn reveal(&self) {
        self.open_page();
    }

    fn set_html(&self, html: &str) {
        if let Err(e) = std::fs::write(&self.page, html) {
            warn!("Failed to write panel page {}: {}", self.page.display(), e);
            return;
        }
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.open_page();
        }
    }

    fn as_view_uri(&self, resource_path: &str) -> String {
        let path = self.extension_root.join(resource_path);
        match url::Url::from_file_path(&path) {
            Ok(uri) => uri.to_string(),
            Err(()) => {
                warn!("Cannot express {} as a file URI", path.display());
                path.display().to_string()
            }
        }
    }

    fn dispose(&self) {
        match std::fs::remove_file(&self.page) {
            Ok(()) => debug!("Removed panel page {}", self.page.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove panel page {}: {}", self.page.display(), e),
        }
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            warn!("Cannot resolve {} against the working directory: {}", path.display(), e);
            path
        }
    }
}
