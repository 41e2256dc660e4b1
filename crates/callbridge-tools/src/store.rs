//! JSON file of tool declarations.
//!
//! The file holds a list of `{name, description, parameters}` objects. A
//! missing file is created empty on first load. Writes go to a temp file
//! that is renamed over the original, and every read-modify-write holds the
//! store lock, so concurrent writers never interleave.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use callbridge_core::error::Result;

use crate::registry::ToolDefinition;

#[derive(Debug, Clone)]
pub struct DefinitionStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl DefinitionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all declarations, creating an empty file if none exists.
    pub async fn load(&self) -> Result<Vec<ToolDefinition>> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    pub async fn save(&self, definitions: &[ToolDefinition]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_all(definitions).await
    }

    /// Insert or replace a declaration by name. Returns `true` when it replaced one.
    pub async fn upsert(&self, definition: ToolDefinition) -> Result<bool> {
        definition.validate()?;
        let _guard = self.lock.lock().await;
        let mut definitions = self.read_all().await?;
        let replaced = match definitions.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => {
                *existing = definition;
                true
            }
            None => {
                definitions.push(definition);
                false
            }
        };
        self.write_all(&definitions).await?;
        Ok(replaced)
    }

    /// Remove a declaration by name. Returns `false` when the store did not hold it.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut definitions = self.read_all().await?;
        let before = definitions.len();
        definitions.retain(|d| d.name != name);
        if definitions.len() == before {
            return Ok(false);
        }
        self.write_all(&definitions).await?;
        Ok(true)
    }

    async fn read_all(&self) -> Result<Vec<ToolDefinition>> {
        if !tokio::fs::try_exists(&self.path).await? {
            warn!(path = %self.path.display(), "Tool definitions file missing, creating empty file");
            self.write_all(&[]).await?;
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let definitions: Vec<ToolDefinition> = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), count = definitions.len(), "Loaded tool definitions");
        Ok(definitions)
    }

    async fn write_all(&self, definitions: &[ToolDefinition]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(definitions)?;
        // Atomic write: temp file then rename
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
