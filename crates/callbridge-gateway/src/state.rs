//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::info;

use callbridge_core::config::Config;
use callbridge_providers::RealtimeBackend;
use callbridge_session::{SessionSettings, SessionState};
use callbridge_tools::{DefinitionStore, SharedToolRegistry, ToolCatalog, ToolDispatcher, ToolRegistry};

/// Shared state accessible from every handler and call.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub settings: SessionSettings,
    pub backend: Arc<dyn RealtimeBackend>,
    pub registry: SharedToolRegistry,
    pub catalog: ToolCatalog,
    pub store: DefinitionStore,
    pub sessions: RwLock<HashMap<String, ActiveSession>>,
    pub completed_sessions: AtomicU64,
    include_builtins: bool,
    parallel_calls: bool,
    reload_lock: Mutex<()>,
}

/// A call currently being bridged.
pub struct ActiveSession {
    pub started_at: DateTime<Utc>,
    pub state: watch::Receiver<SessionState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

impl GatewayState {
    /// Resolve session settings, load the tool definitions store, and bind
    /// the registry against the compiled-in catalog.
    pub async fn new(config: Config, backend: Arc<dyn RealtimeBackend>) -> anyhow::Result<Self> {
        let settings = SessionSettings::from_config(&config)?;
        let tools = config.tools();
        let store = DefinitionStore::new(config.tool_definitions_path());
        let catalog = ToolCatalog::builtin();
        let registry = ToolRegistry::bind(store.load().await?, &catalog, tools.include_builtins);
        info!(
            backend = backend.id(),
            tools = registry.len(),
            store = %store.path().display(),
            "Gateway state initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            settings,
            backend,
            registry: SharedToolRegistry::new(registry),
            catalog,
            store,
            sessions: RwLock::new(HashMap::new()),
            completed_sessions: AtomicU64::new(0),
            include_builtins: tools.include_builtins,
            parallel_calls: tools.parallel_calls,
            reload_lock: Mutex::new(()),
        })
    }

    /// Dispatcher for one session; it sees registry reloads as they happen.
    pub fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::new(self.registry.clone()).with_parallel_calls(self.parallel_calls)
    }

    /// Re-read the definitions store and publish a new registry snapshot.
    /// Reloads are serialised so a slow reader never publishes a stale list.
    pub async fn reload_tools(&self) -> callbridge_core::error::Result<usize> {
        let _guard = self.reload_lock.lock().await;
        let registry = ToolRegistry::bind(self.store.load().await?, &self.catalog, self.include_builtins);
        let count = registry.len();
        self.registry.replace(registry);
        info!(tools = count, "Tool registry reloaded");
        Ok(count)
    }

    pub async fn register_session(&self, session_id: &str, state: watch::Receiver<SessionState>) {
        self.sessions.write().await.insert(
            session_id.to_string(),
            ActiveSession {
                started_at: Utc::now(),
                state,
            },
        );
    }

    pub async fn finish_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        self.completed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, s)| SessionSummary {
                session_id: id.clone(),
                started_at: s.started_at,
                state: *s.state.borrow(),
            })
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }
}
