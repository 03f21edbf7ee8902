//! Panel controller: owns the single embedded view that frames the form.

use crate::config::{EmbedMode, PanelConfig};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Options for a freshly created view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    /// Identity token of the view
    pub view_type: String,
    pub title: String,
    pub enable_scripts: bool,
    pub retain_context_when_hidden: bool,
    /// The only roots the view may load resources from
    pub resource_roots: Vec<String>,
    pub icon_path: String,
}

/// A live embedded view owned by the host.
pub trait PanelView: Send {
    fn reveal(&self);
    fn set_html(&self, html: &str);
    /// Translate an extension-relative resource path into a URI the view can load.
    fn as_view_uri(&self, resource_path: &str) -> String;
    /// Tear down the view. Hosts report the close back through
    /// [`PanelController::on_view_closed`].
    fn dispose(&self);
}

/// Host side that can allocate views.
pub trait PanelHost: Send + Sync {
    fn create_view(&self, options: ViewOptions) -> Box<dyn PanelView>;
}

/// What the relay needs from the panel.
pub trait PanelHandle: Send + Sync {
    fn hide(&self);
}

type Disposable = Box<dyn FnOnce() + Send>;

struct PanelInstance {
    view: Box<dyn PanelView>,
    view_type: String,
    disposables: Vec<Disposable>,
}

impl PanelInstance {
    /// Run the disposal callbacks newest first.
    fn release(mut self) -> Box<dyn PanelView> {
        while let Some(disposable) = self.disposables.pop() {
            disposable();
        }
        self.view
    }
}

/// Enforces a single panel process-wide and drives its teardown.
pub struct PanelController {
    host: Arc<dyn PanelHost>,
    config: PanelConfig,
    local_origin: String,
    remote_origin: String,
    extension_root: String,
    current: Mutex<Option<PanelInstance>>,
}

impl PanelController {
    pub fn new(
        host: Arc<dyn PanelHost>,
        config: PanelConfig,
        local_origin: impl Into<String>,
        remote_origin: impl Into<String>,
        extension_root: impl Into<String>,
    ) -> Self {
        Self {
            host,
            config,
            local_origin: local_origin.into(),
            remote_origin: remote_origin.into(),
            extension_root: extension_root.into(),
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<PanelInstance>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Source of the embedded frame for the configured mode.
    pub fn frame_src(&self) -> String {
        let origin = match self.config.mode {
            EmbedMode::Relayed => &self.local_origin,
            EmbedMode::DirectEmbed => &self.remote_origin,
        };
        format!("{}/", origin.trim_end_matches('/'))
    }

    pub fn view_options(&self) -> ViewOptions {
        let mut resource_roots = vec![format!(
            "{}/{}",
            self.extension_root.trim_end_matches('/'),
            self.config.asset_root
        )];
        if self.config.mode == EmbedMode::Relayed {
            resource_roots.push(format!("{}/", self.local_origin.trim_end_matches('/')));
        }
        resource_roots.push(self.remote_origin.clone());

        ViewOptions {
            view_type: self.config.view_type.clone(),
            title: self.config.title.clone(),
            enable_scripts: true,
            retain_context_when_hidden: true,
            resource_roots,
            icon_path: format!(
                "{}/{}",
                self.extension_root.trim_end_matches('/'),
                self.config.icon
            ),
        }
    }

    /// Reveal the panel if it exists, otherwise create and render it.
    pub fn show_or_create(&self) {
        let mut slot = self.slot();
        if let Some(instance) = slot.as_ref() {
            debug!("Panel already open, revealing");
            instance.view.reveal();
            return;
        }

        let view = self.host.create_view(self.view_options());
        *slot = Some(self.adopt(view));
        info!("Panel created ({:?} mode)", self.config.mode);
    }

    /// Take over a view the host restored from a previous session.
    /// A panel that is already open is disposed first.
    pub fn revive(&self, view: Box<dyn PanelView>) {
        let previous = self.slot().replace(self.adopt(view));
        if let Some(previous) = previous {
            previous.release().dispose();
        }
        info!("Panel revived");
    }

    /// Close the panel. No-op when nothing is open.
    pub fn hide(&self) {
        let taken = self.slot().take();
        if let Some(instance) = taken {
            info!("Hiding panel");
            instance.release().dispose();
        }
    }

    /// The view was closed by the user or by the host. Clears the panel and
    /// releases its disposables; repeated calls do nothing.
    pub fn on_view_closed(&self) {
        let taken = self.slot().take();
        if let Some(instance) = taken {
            debug!("Panel closed by host");
            drop(instance.release());
        }
    }

    /// Attach a callback to run when the current panel is torn down.
    /// Returns false (and drops the callback) when no panel is open.
    pub fn register_disposable(&self, disposable: impl FnOnce() + Send + 'static) -> bool {
        match self.slot().as_mut() {
            Some(instance) => {
                instance.disposables.push(Box::new(disposable));
                true
            }
            None => false,
        }
    }

    pub fn current_view_type(&self) -> Option<String> {
        self.slot().as_ref().map(|instance| instance.view_type.clone())
    }

    fn adopt(&self, view: Box<dyn PanelView>) -> PanelInstance {
        let stylesheet = view.as_view_uri(&format!(
            "{}/{}",
            self.config.asset_root, self.config.stylesheet
        ));
        view.set_html(&render_html(&stylesheet, &self.frame_src(), &self.config.title));
        PanelInstance {
            view,
            view_type: self.config.view_type.clone(),
            disposables: Vec::new(),
        }
    }
}

impl PanelHandle for PanelController {
    fn hide(&self) {
        PanelController::hide(self);
    }
}

/// The panel document: a stylesheet and one full-frame iframe.
pub fn render_html(stylesheet_uri: &str, frame_src: &str, title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <link href="{}" rel="stylesheet">
  <style>
    html, body {{ margin: 0; padding: 0; height: 100%; overflow: hidden; }}
    #spring-initializr {{ display: block; border: 0; width: 100%; height: 100vh; }}
  </style>
  <title>{}</title>
</head>
<body>
  <iframe id="spring-initializr" src="{}"></iframe>
</body>
</html>
"#,
        html_escape::encode_double_quoted_attribute(stylesheet_uri),
        html_escape::encode_text(title),
        html_escape::encode_double_quoted_attribute(frame_src)
    )
}
