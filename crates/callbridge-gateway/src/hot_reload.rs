//! Tool definitions hot-reload via filesystem watcher.
//!
//! Watches the definitions file and rebinds the registry on change. The
//! notify callback runs on its own thread, so it only signals a reload task
//! on the Tokio runtime.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::state::GatewayState;

/// Keeps the watcher alive; dropping it stops reloads.
pub struct ToolsWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ToolsWatcher {
    /// Start watching the definitions file behind `state.store`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(state: Arc<GatewayState>) -> anyhow::Result<Self> {
        let file_path = state.store.path().to_path_buf();
        let file_name = file_path.file_name().map(|n| n.to_os_string());
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        error!(%e, "Tool definitions watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
                {
                    return;
                }
                debug!("Tool definitions changed");
                let _ = change_tx.send(());
            })?;

        // Watch the parent directory to catch editors that replace the file.
        let watch_path = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;

        // Ends once the watcher, and with it the sender, is dropped.
        tokio::spawn(async move {
            while change_rx.recv().await.is_some() {
                // One save usually fires several events.
                while change_rx.try_recv().is_ok() {}
                // A half-written file fails to parse; the next write event retries.
                if let Err(e) = state.reload_tools().await {
                    error!(%e, "Failed to reload tool definitions");
                }
            }
        });
        info!(path = %file_path.display(), "Tool definitions watcher started");

        Ok(Self { _watcher: watcher })
    }
}
