//! Preview server with live reload for livemd.
//!
//! Keeps a rendered HTML document in sync with its Markdown source and
//! reloads connected browsers over a WebSocket whenever it changes.

pub mod live;
pub mod reload;
pub mod server;
pub mod watcher;

pub use live::{LiveConfig, LiveError, LiveLoop, LoopState, RenderStatus, RunningLoop};
pub use reload::{ReloadHub, ReloadMessage};
pub use server::{BoundServer, PreviewServer, PreviewServerConfig, ServerError, DEFAULT_PORT};
pub use watcher::{FileWatcher, WatchError, WatchEvent};
