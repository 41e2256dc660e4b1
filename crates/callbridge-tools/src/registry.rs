//! Tool registry: declarations bound to compiled-in implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use callbridge_core::error::{CallBridgeError, Result};

use crate::Tool;
use crate::restaurant::{
    BookReservationTool, CheckOrderStatusTool, GetMenuTool, OrderBook, PlaceOrderTool,
};

/// A tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema")]
    pub parameters: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDefinition {
    /// Declaration derived from an implementation's own metadata.
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }

    /// Names listed under `required` in the parameter schema.
    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Reject definitions the model API would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err(CallBridgeError::Tool(format!(
                "tool name must be 1-64 characters: {:?}",
                self.name
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CallBridgeError::Tool(format!(
                "tool name may only contain letters, digits, '_' and '-': {}",
                self.name
            )));
        }
        if !self.parameters.is_object() {
            return Err(CallBridgeError::Tool(format!(
                "parameters of {} must be a JSON object",
                self.name
            )));
        }
        Ok(())
    }

    /// Function declaration in the shape streaming backends expect.
    pub fn to_function_declaration(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Compiled-in implementations, keyed by tool name.
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The restaurant tools, sharing one order book.
    pub fn builtin() -> Self {
        let orders = OrderBook::default();
        Self::new()
            .with(Arc::new(GetMenuTool))
            .with(Arc::new(PlaceOrderTool::new(orders.clone())))
            .with(Arc::new(CheckOrderStatusTool::new(orders)))
            .with(Arc::new(BookReservationTool))
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Implementations sorted by name.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }
}

/// A declared tool and its implementation, if one is compiled in.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub implementation: Option<Arc<dyn Tool>>,
}

/// Immutable table of tools for one registry generation.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under its own declaration.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let definition = ToolDefinition::from_tool(tool.as_ref());
        self.insert(definition, Some(tool));
    }

    fn insert(&mut self, definition: ToolDefinition, implementation: Option<Arc<dyn Tool>>) {
        let entry = RegisteredTool {
            definition,
            implementation,
        };
        match self
            .tools
            .iter_mut()
            .find(|t| t.definition.name == entry.definition.name)
        {
            Some(existing) => *existing = entry,
            None => self.tools.push(entry),
        }
    }

    /// Bind stored declarations to the catalog.
    ///
    /// Declarations keep their stored description and schema. With
    /// `include_builtins`, catalog tools the store does not mention are
    /// appended with their own declarations.
    pub fn bind(
        definitions: Vec<ToolDefinition>,
        catalog: &ToolCatalog,
        include_builtins: bool,
    ) -> Self {
        let mut registry = Self::new();
        for definition in definitions {
            let implementation = catalog.get(&definition.name);
            if implementation.is_none() {
                warn!(tool = %definition.name, "Tool declared without a compiled-in implementation");
            }
            registry.insert(definition, implementation);
        }
        if include_builtins {
            for tool in catalog.tools() {
                if registry.get(tool.name()).is_none() {
                    registry.register(tool);
                }
            }
        }
        debug!(tools = ?registry.names(), "Tool registry bound");
        registry
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Function declarations for the backend session setup.
    pub fn to_function_declarations(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| t.definition.to_function_declaration())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registry handle shared by sessions, the control plane, and the file
/// watcher. The lock is held only to clone or swap the snapshot `Arc`.
#[derive(Clone, Default)]
pub struct SharedToolRegistry {
    inner: Arc<RwLock<Arc<ToolRegistry>>>,
}

impl SharedToolRegistry {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Current generation. Calls in flight keep the snapshot they resolved.
    pub fn snapshot(&self) -> Arc<ToolRegistry> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publish a new generation.
    pub fn replace(&self, registry: ToolRegistry) {
        let next = Arc::new(registry);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
