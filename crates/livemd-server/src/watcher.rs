//! Single-file watching.
//!
//! The watch is placed on the file's parent directory and filtered by file
//! name. Editors that save by writing a temporary file and renaming it over
//! the original replace the inode, which a watch on the file itself would
//! lose track of.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File contents changed
    Modified(PathBuf),

    /// File appeared (created, or renamed onto the watched name)
    Created(PathBuf),

    /// File disappeared (deleted, or renamed away)
    Removed(PathBuf),
}

impl WatchEvent {
    /// Path the event refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Modified(path) | Self::Created(path) | Self::Removed(path) => path,
        }
    }
}

/// Errors that can occur when setting up a watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Watched file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to watch {}: {source}", path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Watches a single file for changes.
///
/// Events stop when this value is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl FileWatcher {
    /// Start watching `path`, which must exist.
    ///
    /// Returns the watcher and a channel to receive events.
    pub fn new(path: &Path) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), WatchError> {
        if !path.exists() {
            return Err(WatchError::Missing(path.to_path_buf()));
        }

        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| WatchError::Missing(path.to_path_buf()))?;
        let dir = watch_dir(path);

        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let notify_err = |source| WatchError::Notify {
            path: path.to_path_buf(),
            source,
        };

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            match res {
                Ok(event) => {
                    let _ = sync_tx.send(event);
                }
                Err(e) => tracing::warn!("File watch error: {}", e),
            }
        })
        .map_err(notify_err)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(notify_err)?;

        // Forward matching events into the async channel
        std::thread::spawn(move || {
            while let Ok(event) = sync_rx.recv() {
                for (index, event_path) in event.paths.iter().enumerate() {
                    if event_path.file_name() != Some(file_name.as_os_str()) {
                        continue;
                    }
                    if let Some(e) = classify_event(event_path, &event.kind, index) {
                        if async_tx.blocking_send(e).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        tracing::debug!("Watching {} (via {})", path.display(), dir.display());

        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            async_rx,
        ))
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory to place the watch on.
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Classify a notify event into a WatchEvent.
///
/// `index` is the position of `path` in the event's path list; for a
/// two-sided rename the first path is the old name and the second the new.
fn classify_event(path: &Path, kind: &EventKind, index: usize) -> Option<WatchEvent> {
    let path = path.to_path_buf();

    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path)),
        EventKind::Remove(_) => Some(WatchEvent::Removed(path)),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => Some(WatchEvent::Removed(path)),
            RenameMode::Both if index == 0 => Some(WatchEvent::Removed(path)),
            _ => Some(WatchEvent::Created(path)),
        },
        // Reading the file must not count as a change
        EventKind::Modify(ModifyKind::Metadata(meta)) => match meta {
            MetadataKind::WriteTime => Some(WatchEvent::Modified(path)),
            _ => None,
        },
        EventKind::Modify(_) => Some(WatchEvent::Modified(path)),
        _ => None,
    }
}
