//! Preview server implementation.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::{
    body::{self, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;

use crate::reload::{reload_client_script, ReloadHub, ReloadMessage};
use crate::watcher::{FileWatcher, WatchError, WatchEvent};

/// Port the preview server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3000;

/// WebSocket endpoint for reload messages.
pub const RELOAD_SOCKET_PATH: &str = "/__livemd/ws";

/// Endpoint serving the reload client script.
pub const RELOAD_SCRIPT_PATH: &str = "/__livemd/client.js";

/// Largest HTML response the script injection will buffer.
const MAX_INJECT_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the preview server.
#[derive(Debug, Clone)]
pub struct PreviewServerConfig {
    /// Directory served as static files
    pub root: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Files whose changes reload connected browsers
    pub watch: Vec<PathBuf>,

    /// Open a browser once listening
    pub open: bool,

    /// URL path opened in the browser
    pub landing_page: String,
}

impl Default for PreviewServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            watch: Vec::new(),
            open: true,
            landing_page: "/".to_string(),
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("File watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Server error: {0}")]
    Serve(#[source] io::Error),
}

/// Preview server, not yet listening.
pub struct PreviewServer {
    config: PreviewServerConfig,
    hub: ReloadHub,
}

impl PreviewServer {
    /// Create a new preview server broadcasting through `hub`.
    pub fn new(config: PreviewServerConfig, hub: ReloadHub) -> Self {
        Self { config, hub }
    }

    /// Bind the listener and start watching the configured files.
    ///
    /// Fails fast if the port is taken.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        for path in &self.config.watch {
            let (watcher, rx) = FileWatcher::new(path)?;
            tokio::spawn(reload_on_change(watcher, rx, self.hub.clone()));
        }

        Ok(BoundServer {
            listener,
            local_addr,
            app: router(&self.config.root, self.hub),
            open: self.config.open,
            landing_page: self.config.landing_page,
        })
    }
}

/// Preview server with a bound listener.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: Router,
    open: bool,
    landing_page: String,
}

impl BoundServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL of the landing page.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.local_addr, self.landing_page)
    }

    /// Serve requests until the process ends.
    pub async fn serve(self) -> Result<(), ServerError> {
        let url = self.url();
        tracing::info!("Serving preview at {}", url);

        if self.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        axum::serve(self.listener, self.app)
            .await
            .map_err(ServerError::Serve)
    }
}

/// Build the preview router: static files from `root` with the reload
/// endpoints alongside.
pub fn router(root: &Path, hub: ReloadHub) -> Router {
    Router::new()
        .route(RELOAD_SOCKET_PATH, get(ws_handler))
        .route(RELOAD_SCRIPT_PATH, get(client_script_handler))
        .fallback_service(ServeDir::new(root))
        .layer(middleware::map_response(inject_reload_script))
        .with_state(hub)
}

/// Broadcast a reload whenever a watched file changes.
async fn reload_on_change(
    watcher: FileWatcher,
    mut rx: tokio::sync::mpsc::Receiver<WatchEvent>,
    hub: ReloadHub,
) {
    while let Some(event) = rx.recv().await {
        match event {
            WatchEvent::Removed(_) => {
                tracing::debug!("Served file removed: {}", event.path().display());
            }
            WatchEvent::Modified(_) | WatchEvent::Created(_) => {
                tracing::debug!("Served file changed: {}", event.path().display());
                hub.reload();
            }
        }
    }
    // Keep watcher alive
    drop(watcher);
}

/// Handler for the reload WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<ReloadHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, hub))
}

/// Handle a WebSocket connection.
async fn handle_ws(mut socket: WebSocket, hub: ReloadHub) {
    let mut rx = hub.subscribe();

    if send_message(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(msg) => {
                    if send_message(&mut socket, &msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Reload client lagged by {} messages", skipped);
                    if send_message(&mut socket, &ReloadMessage::Reload).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the reload client script.
async fn client_script_handler() -> impl IntoResponse {
    let script = reload_client_script(RELOAD_SOCKET_PATH);
    ([(header::CONTENT_TYPE, "application/javascript")], script)
}

/// Add the reload script to HTML responses.
///
/// The file on disk is left untouched; only the served copy changes.
async fn inject_reload_script(response: Response) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to buffer HTML response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Pages that are not UTF-8 are served byte for byte, without the script
    let Ok(html) = std::str::from_utf8(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    let tag = format!(r#"<script src="{}"></script>"#, RELOAD_SCRIPT_PATH);
    let injected = inject_script_tag(html, &tag);

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(injected))
}

/// Insert `tag` before the last `</body>`, or append it if there is none.
fn inject_script_tag(html: &str, tag: &str) -> String {
    let mut out = String::with_capacity(html.len() + tag.len());

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            out.push_str(&html[..pos]);
            out.push_str(tag);
            out.push_str(&html[pos..]);
        }
        None => {
            out.push_str(html);
            out.push_str(tag);
        }
    }

    out
}
