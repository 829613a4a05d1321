//! The bot's "now playing" text and the task that keeps it published.
//!
//! [`SharedStatus`] is written by the `!setgame` handler and read by the
//! [`StatusUpdater`] task, which pushes it to the gateway on a fixed
//! interval until the session shuts it down.

use std::sync::Arc;
use std::time::Duration;

use async_lock::RwLock;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Either `{enabled: false, text: ""}` or `{enabled: true, text: <non-empty>}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusState {
    pub text: String,
    pub enabled: bool,
}

impl StatusState {
    /// The text to publish, or `None` when the status is cleared.
    pub fn presence_text(&self) -> Option<&str> {
        if self.enabled {
            Some(self.text.as_str())
        } else {
            None
        }
    }
}

/// Result of a [`SharedStatus::set`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Set(String),
    Cleared,
}

/// Handle to the session's status state. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SharedStatus {
    inner: Arc<RwLock<StatusState>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusState {
        self.inner.read().await.clone()
    }

    /// Set the status to `text` (trimmed). Blank text clears it.
    pub async fn set(&self, text: &str) -> StatusChange {
        let text = text.trim();
        let mut state = self.inner.write().await;
        if text.is_empty() {
            state.text.clear();
            state.enabled = false;
            StatusChange::Cleared
        } else {
            state.text = text.to_string();
            state.enabled = true;
            StatusChange::Set(state.text.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Presence sink
// ---------------------------------------------------------------------------

/// Destination for presence updates (the gateway in production).
#[async_trait]
pub trait PresenceSink: Send + Sync {
    /// Show `text` as the current activity, or clear it with `None`.
    async fn set_presence(&self, text: Option<&str>) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// Updater task
// ---------------------------------------------------------------------------

/// Running status updater. Stop it with [`StatusUpdater::shutdown`].
pub struct StatusUpdater {
    cancel_tx: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl StatusUpdater {
    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "status updater task did not exit cleanly");
        }
    }
}

/// Spawn a task that publishes `status` to `sink` every `interval`.
///
/// The first publish happens immediately.
pub fn spawn_status_updater<S>(status: SharedStatus, sink: S, interval: Duration) -> StatusUpdater
where
    S: PresenceSink + 'static,
{
    let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_s = interval.as_secs(), "status updater started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let state = status.snapshot().await;
                    let text = state.presence_text();
                    if let Err(e) = sink.set_presence(text).await {
                        warn!(error = %e, "failed to update presence");
                    } else {
                        debug!(status = ?text, "presence updated");
                    }
                }
                _ = cancel_rx.recv() => {
                    info!("status updater stopped");
                    return;
                }
            }
        }
    });

    StatusUpdater { cancel_tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_lock::Mutex;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SharedStatus: Send, Sync, Clone);

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl PresenceSink for RecordingSink {
        async fn set_presence(&self, text: Option<&str>) -> Result<(), String> {
            self.calls.lock().await.push(text.map(str::to_string));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PresenceSink for FailingSink {
        async fn set_presence(&self, _text: Option<&str>) -> Result<(), String> {
            Err("gateway gone".to_string())
        }
    }

    #[tokio::test]
    async fn initial_state_is_disabled_and_empty() {
        let status = SharedStatus::new();
        assert_eq!(status.snapshot().await, StatusState::default());
        assert_eq!(status.snapshot().await.presence_text(), None);
    }

    #[tokio::test]
    async fn set_non_empty_enables() {
        let status = SharedStatus::new();
        assert_eq!(
            status.set("Among Us").await,
            StatusChange::Set("Among Us".to_string())
        );
        let state = status.snapshot().await;
        assert!(state.enabled);
        assert_eq!(state.text, "Among Us");
    }

    #[tokio::test]
    async fn set_blank_clears() {
        let status = SharedStatus::new();
        status.set("Among Us").await;
        for blank in ["", " ", "\t  "] {
            assert_eq!(status.set(blank).await, StatusChange::Cleared);
            assert_eq!(status.snapshot().await, StatusState::default());
        }
    }

    #[tokio::test]
    async fn clones_share_state() {
        let status = SharedStatus::new();
        let other = status.clone();
        other.set("chess").await;
        assert_eq!(status.snapshot().await.presence_text(), Some("chess"));
    }

    #[tokio::test(start_paused = true)]
    async fn updater_publishes_each_tick() {
        let status = SharedStatus::new();
        let sink = RecordingSink::default();
        let updater = spawn_status_updater(status.clone(), sink.clone(), Duration::from_secs(60));

        // First tick fires immediately with the cleared status.
        tokio::time::sleep(Duration::from_millis(1)).await;
        status.set("Among Us").await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        status.set("").await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        updater.shutdown().await;

        let calls = sink.calls.lock().await.clone();
        assert_eq!(calls, vec![None, Some("Among Us".to_string()), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn updater_stops_on_shutdown() {
        let sink = RecordingSink::default();
        let updater =
            spawn_status_updater(SharedStatus::new(), sink.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(1)).await;
        updater.shutdown().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sink.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn updater_survives_sink_errors() {
        let updater = spawn_status_updater(SharedStatus::new(), FailingSink, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        // Still running: shutdown must complete normally.
        updater.shutdown().await;
    }
}
