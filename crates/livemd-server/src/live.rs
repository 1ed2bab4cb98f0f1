//! The render-on-change loop.
//!
//! Startup renders once, binds the preview server, then watches the source
//! file. Every change re-renders the document and reloads the browsers.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use livemd_render::{
    DocumentTemplate, MarkdownOptions, RenderError, Rendered, Renderer, TemplateError,
    DEFAULT_TITLE,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::reload::ReloadHub;
use crate::server::{PreviewServer, PreviewServerConfig, ServerError, DEFAULT_PORT};
use crate::watcher::{FileWatcher, WatchError, WatchEvent};

/// Quiet period after a change before rendering.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Configuration for one live preview.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Markdown source file
    pub source: PathBuf,

    /// Generated HTML document
    pub output: PathBuf,

    /// Directory served by the preview server
    pub root: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Open a browser on start
    pub open: bool,

    /// Document title
    pub title: String,

    /// Quiet period used to coalesce bursts of changes
    pub debounce: Duration,

    /// Markdown dialect options
    pub markdown: MarkdownOptions,

    /// Custom document template source
    pub template: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("README.md"),
            output: PathBuf::from("index.html"),
            root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            open: true,
            title: DEFAULT_TITLE.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            markdown: MarkdownOptions::default(),
            template: None,
        }
    }
}

impl LiveConfig {
    /// Build the renderer described by this configuration.
    pub fn renderer(&self) -> Result<Renderer, TemplateError> {
        let mut renderer = Renderer::new(&self.source, &self.output)
            .with_title(&self.title)
            .with_options(self.markdown);

        if let Some(source) = &self.template {
            renderer = renderer.with_template(DocumentTemplate::from_source(source.clone())?);
        }

        Ok(renderer)
    }
}

/// What the loop is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next change
    Idle,

    /// Reading, converting and writing the document
    Rendering,
}

/// Observable status of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderStatus {
    /// Current state
    pub state: LoopState,

    /// Number of successful renders so far
    pub renders: u64,

    /// Error from the most recent render, cleared by the next success
    pub last_error: Option<String>,
}

impl Default for RenderStatus {
    fn default() -> Self {
        Self {
            state: LoopState::Rendering,
            renders: 0,
            last_error: None,
        }
    }
}

/// Errors that stop the loop.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("Invalid document template: {0}")]
    Template(#[from] TemplateError),

    #[error("Initial render failed: {0}")]
    InitialRender(#[source] RenderError),

    #[error("Preview server failed: {0}")]
    Server(#[from] ServerError),

    #[error("Failed to watch source: {0}")]
    Watch(#[source] WatchError),

    #[error("Preview server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A live preview of one Markdown file.
pub struct LiveLoop {
    config: LiveConfig,
    renderer: Renderer,
    hub: ReloadHub,
    status: watch::Sender<RenderStatus>,
}

impl LiveLoop {
    /// Create a loop. Fails only if the configured template is invalid.
    pub fn new(config: LiveConfig) -> Result<Self, LiveError> {
        let renderer = config.renderer()?;
        let (status, _) = watch::channel(RenderStatus::default());

        Ok(Self {
            config,
            renderer,
            hub: ReloadHub::new(),
            status,
        })
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<RenderStatus> {
        self.status.subscribe()
    }

    /// Hub used to signal browsers.
    pub fn hub(&self) -> ReloadHub {
        self.hub.clone()
    }

    /// Run until the process is terminated.
    pub async fn run(self) -> Result<(), LiveError> {
        self.start().await?.wait().await
    }

    /// Render, start the preview server and the source watcher, and return
    /// once all three are up.
    pub async fn start(self) -> Result<RunningLoop, LiveError> {
        let Self {
            config,
            renderer,
            hub,
            status,
        } = self;

        let rendered = render_once(&renderer, &status).map_err(LiveError::InitialRender)?;
        log_rendered(&renderer, &rendered);

        let server_config = PreviewServerConfig {
            root: config.root.clone(),
            host: config.host.clone(),
            port: config.port,
            watch: vec![config.output.clone()],
            open: config.open,
            landing_page: landing_page(&config.root, &config.output),
        };
        let server = PreviewServer::new(server_config, hub.clone()).bind().await?;

        let (watcher, rx) = FileWatcher::new(&config.source).map_err(LiveError::Watch)?;
        tracing::info!("Watching {} for changes", config.source.display());

        let local_addr = server.local_addr();
        let url = server.url();
        let status_rx = status.subscribe();

        let watch_task = tokio::spawn(watch_source(
            watcher,
            rx,
            renderer,
            hub,
            status,
            config.debounce,
        ));
        let server_task = tokio::spawn(server.serve());

        Ok(RunningLoop {
            local_addr,
            url,
            status: status_rx,
            server_task,
            watch_task,
        })
    }
}

/// Handle to a started loop.
pub struct RunningLoop {
    local_addr: SocketAddr,
    url: String,
    status: watch::Receiver<RenderStatus>,
    server_task: JoinHandle<Result<(), ServerError>>,
    watch_task: JoinHandle<()>,
}

impl RunningLoop {
    /// Address the preview server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL of the rendered document.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<RenderStatus> {
        self.status.clone()
    }

    /// Whether the server and watcher are both still running.
    pub fn is_running(&self) -> bool {
        !self.server_task.is_finished() && !self.watch_task.is_finished()
    }

    /// Wait for the preview server to stop.
    pub async fn wait(self) -> Result<(), LiveError> {
        let result = self.server_task.await;
        self.watch_task.abort();
        Ok(result??)
    }

    /// Stop the server and the watcher.
    pub fn shutdown(self) {
        self.server_task.abort();
        self.watch_task.abort();
    }
}

/// Consume source change events, re-rendering after each burst.
async fn watch_source(
    watcher: FileWatcher,
    mut rx: mpsc::Receiver<WatchEvent>,
    renderer: Renderer,
    hub: ReloadHub,
    status: watch::Sender<RenderStatus>,
    debounce: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut latest = first;

        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        while let Ok(next) = rx.try_recv() {
            latest = next;
        }

        tracing::debug!("Change in {}: {:?}", watcher.path().display(), latest);

        if !renderer.source().exists() {
            tracing::warn!(
                "{} was removed; waiting for it to reappear",
                renderer.source().display()
            );
            continue;
        }

        match render_once(&renderer, &status) {
            Ok(rendered) => {
                log_rendered(&renderer, &rendered);
                hub.reload();
            }
            Err(e) => {
                tracing::error!("{}", e);
                hub.render_failed(e.to_string());
            }
        }
    }
    // Keep watcher alive
    drop(watcher);
}

/// One render, with the status transitions around it.
fn render_once(
    renderer: &Renderer,
    status: &watch::Sender<RenderStatus>,
) -> Result<Rendered, RenderError> {
    status.send_modify(|s| s.state = LoopState::Rendering);

    let result = renderer.render();

    status.send_modify(|s| {
        s.state = LoopState::Idle;
        match &result {
            Ok(_) => {
                s.renders += 1;
                s.last_error = None;
            }
            Err(e) => s.last_error = Some(e.to_string()),
        }
    });

    result
}

fn log_rendered(renderer: &Renderer, rendered: &Rendered) {
    tracing::info!(
        "Rendered {} -> {} ({} bytes)",
        renderer.source().display(),
        rendered.output.display(),
        rendered.bytes
    );
}

/// URL path of `output` when served from `root`.
///
/// Falls back to `/` when the output lies outside the served directory.
fn landing_page(root: &Path, output: &Path) -> String {
    let relative = if output.is_relative() && is_current_dir(root) {
        output
    } else {
        match output.strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => {
                tracing::warn!(
                    "{} is outside the served directory {}",
                    output.display(),
                    root.display()
                );
                return "/".to_string();
            }
        }
    };

    let segments: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();

    match segments.as_slice() {
        [only] if only == "index.html" => "/".to_string(),
        _ => format!("/{}", segments.join("/")),
    }
}

fn is_current_dir(path: &Path) -> bool {
    path.as_os_str().is_empty() || path == Path::new(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn landing_page_for_index_is_root() {
        assert_eq!(landing_page(Path::new("."), Path::new("index.html")), "/");
        assert_eq!(landing_page(Path::new(""), Path::new("./index.html")), "/");
    }

    #[test]
    fn landing_page_for_other_outputs() {
        assert_eq!(
            landing_page(Path::new("."), Path::new("preview/codes.html")),
            "/preview/codes.html"
        );
        assert_eq!(
            landing_page(Path::new("/srv/site"), Path::new("/srv/site/tcp.html")),
            "/tcp.html"
        );
        assert_eq!(
            landing_page(Path::new("/srv/site"), Path::new("/elsewhere/tcp.html")),
            "/"
        );
    }

    #[test]
    fn invalid_template_is_rejected() {
        let config = LiveConfig {
            template: Some("{% for %}".to_string()),
            ..Default::default()
        };

        assert!(matches!(LiveLoop::new(config), Err(LiveError::Template(_))));
    }

    #[test]
    fn render_once_tracks_status() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.md");
        fs::write(&source, "# A").unwrap();

        let renderer = Renderer::new(&source, temp.path().join("index.html"));
        let (status, rx) = watch::channel(RenderStatus::default());

        render_once(&renderer, &status).unwrap();
        assert_eq!(
            *rx.borrow(),
            RenderStatus {
                state: LoopState::Idle,
                renders: 1,
                last_error: None,
            }
        );

        fs::remove_file(&source).unwrap();
        assert!(render_once(&renderer, &status).is_err());

        let current = rx.borrow().clone();
        assert_eq!(current.state, LoopState::Idle);
        assert_eq!(current.renders, 1);
        assert!(current.last_error.unwrap().contains("doc.md"));
    }

    #[test]
    fn config_builds_renderer_with_title() {
        let config = LiveConfig {
            title: "Heartbeat".to_string(),
            ..Default::default()
        };

        let html = config.renderer().unwrap().render_document("# Up").unwrap();

        assert!(html.contains("<title>Heartbeat</title>"));
    }
}
