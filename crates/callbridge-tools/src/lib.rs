//! Tools the voice agent can call mid-conversation.
//!
//! Tools are compiled-in capabilities exposed to the AI backend as function
//! declarations. Each tool implements the [`Tool`] trait; the
//! [`ToolRegistry`] binds the declarations loaded from the definitions
//! store to these implementations, and the [`ToolDispatcher`] executes
//! tool-call requests against the current registry snapshot.

use async_trait::async_trait;

pub mod dispatcher;
pub mod registry;
pub mod restaurant;
pub mod store;

pub use dispatcher::ToolDispatcher;
pub use registry::{SharedToolRegistry, ToolCatalog, ToolDefinition, ToolRegistry};
pub use store::DefinitionStore;

/// Per-session context handed to every tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub stream_sid: Option<String>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, stream_sid: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stream_sid,
        }
    }
}

/// The core tool trait. Every compiled-in tool implements this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the model (e.g. "get_menu").
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool. The returned value is sent back to the model as-is.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<serde_json::Value>;
}
