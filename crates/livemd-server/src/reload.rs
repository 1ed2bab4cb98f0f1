//! WebSocket-based live reload.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Reload requests closer together than this collapse into one.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Messages sent to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Full page reload
    Reload,

    /// The latest render failed; the page shows the previous document
    RenderFailed {
        /// Human-readable error
        message: String,
    },

    /// Connection established
    Connected,
}

/// Coalescing state shared by clones of a hub.
#[derive(Debug, Default)]
struct Coalesce {
    /// When the last reload went out
    last_sent: Option<Instant>,

    /// A trailing reload is scheduled for the end of the current window
    deferred: bool,
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
    coalesce: Arc<Mutex<Coalesce>>,
    coalesce_window: Duration,
}

impl ReloadHub {
    /// Create a new reload hub.
    pub fn new() -> Self {
        Self::with_coalesce_window(DEFAULT_COALESCE_WINDOW)
    }

    /// Create a hub that sends at most one reload per `window`.
    ///
    /// Requests inside the window are folded into one trailing reload sent
    /// when the window closes, so the last request is never lost.
    pub fn with_coalesce_window(window: Duration) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            coalesce: Arc::new(Mutex::new(Coalesce::default())),
            coalesce_window: window,
        }
    }

    /// Ask every client to reload.
    ///
    /// Returns `true` when the reload went out immediately and `false` when
    /// it was folded into a trailing reload at the end of the window.
    pub fn reload(&self) -> bool {
        let now = Instant::now();
        let remaining = {
            let mut state = self.coalesce.lock().unwrap_or_else(PoisonError::into_inner);
            if state.deferred {
                return false;
            }

            let elapsed = state.last_sent.map(|previous| now.duration_since(previous));
            match elapsed {
                Some(elapsed) if elapsed < self.coalesce_window => {
                    state.deferred = true;
                    self.coalesce_window - elapsed
                }
                _ => {
                    state.last_sent = Some(now);
                    drop(state);
                    self.send_reload();
                    return true;
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let hub = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(remaining).await;
                    {
                        let mut state =
                            hub.coalesce.lock().unwrap_or_else(PoisonError::into_inner);
                        state.deferred = false;
                        state.last_sent = Some(Instant::now());
                    }
                    hub.send_reload();
                });
            }
            Err(_) => {
                // No runtime to defer on; send now
                let mut state = self.coalesce.lock().unwrap_or_else(PoisonError::into_inner);
                state.deferred = false;
                state.last_sent = Some(now);
                drop(state);
                self.send_reload();
            }
        }

        false
    }

    fn send_reload(&self) {
        tracing::debug!("Reloading {} client(s)", self.subscriber_count());
        self.send(ReloadMessage::Reload);
    }

    /// Tell every client the latest render failed.
    pub fn render_failed(&self, message: impl Into<String>) {
        self.send(ReloadMessage::RenderFailed {
            message: message.into(),
        });
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(msg);
    }

    /// Subscribe to reload messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the client-side reload script.
///
/// The socket URL is derived from the page's own host, so the script works
/// whatever address the server ended up bound to.
pub fn reload_client_script(socket_path: &str) -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var attempts = 0;
  var maxAttempts = 10;

  function connect() {{
    var scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    var ws = new WebSocket(scheme + location.host + '{}');

    ws.onopen = function() {{
      console.log('[livemd] Connected');
      if (attempts > 0) {{
        location.reload();
      }}
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);

      switch (msg.type) {{
        case 'reload':
          location.reload();
          break;

        case 'render_failed':
          console.error('[livemd] Render failed:', msg.message);
          break;

        case 'connected':
          break;
      }}
    }};

    ws.onclose = function() {{
      if (attempts < maxAttempts) {{
        attempts++;
        setTimeout(connect, 1000 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        socket_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_broadcasts_messages() {
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();

        assert!(hub.reload());

        match rx.try_recv() {
            Ok(ReloadMessage::Reload) => {}
            other => panic!("Expected Reload message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn folds_back_to_back_reloads_into_one_trailing_reload() {
        let hub = ReloadHub::with_coalesce_window(Duration::from_millis(50));
        let mut rx = hub.subscribe();

        assert!(hub.reload());
        assert!(!hub.reload());
        assert!(!hub.reload());

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert!(rx.try_recv().is_err());

        let trailing = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("trailing reload should be sent when the window closes")
            .unwrap();
        assert_eq!(trailing, ReloadMessage::Reload);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reload_after_window_goes_out_immediately() {
        let hub = ReloadHub::with_coalesce_window(Duration::from_millis(20));
        let mut rx = hub.subscribe();

        assert!(hub.reload());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(hub.reload());

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
    }

    #[test]
    fn without_runtime_reloads_are_sent_directly() {
        let hub = ReloadHub::with_coalesce_window(Duration::from_secs(60));
        let mut rx = hub.subscribe();

        assert!(hub.reload());
        assert!(!hub.reload());

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
    }

    #[test]
    fn zero_window_sends_every_reload() {
        let hub = ReloadHub::with_coalesce_window(Duration::ZERO);
        let mut rx = hub.subscribe();

        assert!(hub.reload());
        assert!(hub.reload());

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
    }

    #[test]
    fn render_failures_are_not_coalesced() {
        let hub = ReloadHub::with_coalesce_window(Duration::from_secs(60));
        let mut rx = hub.subscribe();

        hub.reload();
        hub.render_failed("boom");

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(
            rx.try_recv().unwrap(),
            ReloadMessage::RenderFailed {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn serializes_messages() {
        let reload = serde_json::to_string(&ReloadMessage::Reload).unwrap();
        assert_eq!(reload, r#"{"type":"reload"}"#);

        let failed = serde_json::to_string(&ReloadMessage::RenderFailed {
            message: "missing".to_string(),
        })
        .unwrap();
        assert_eq!(failed, r#"{"type":"render_failed","message":"missing"}"#);
    }

    #[test]
    fn counts_subscribers() {
        let hub = ReloadHub::new();
        assert_eq!(hub.subscriber_count(), 0);

        let _rx = hub.subscribe();
        let clone = hub.clone();

        assert_eq!(clone.subscriber_count(), 1);
    }

    #[test]
    fn client_script_uses_socket_path() {
        let script = reload_client_script("/__livemd/ws");

        assert!(script.contains("location.host + '/__livemd/ws'"));
        assert!(script.contains("location.reload()"));
    }
}
