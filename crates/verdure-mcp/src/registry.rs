//! Local tool registry.
//!
//! Tools are addressable by dot-path names (`self.<device>.<action>`): the
//! first segment identifies the owner, the last the method. String keys stop
//! at this boundary — devices construct typed [`ToolDescriptor`]s at startup
//! and handlers receive validated argument maps.
//!
//! The registry is read-mostly: writes happen during construction only, so a
//! reader-writer lock guards the map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value, json};

use crate::error::McpError;
use crate::schema::validate_arguments;

/// A tool handler: validated arguments in, human-readable result text out.
pub type ToolHandler = Arc<dyn Fn(&Map<String, Value>) -> Result<String, McpError> + Send + Sync>;

/// A named, schema-described callable exposed to the server.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Dot-path name, e.g. `self.lamp.turn_on`.
    pub name: String,
    pub description: String,
    /// JSON Schema for the `arguments` object.
    pub input_schema: Value,
    handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// The local tool registry.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Names are unique within the registry.
    pub fn register(&self, descriptor: ToolDescriptor) -> Result<(), McpError> {
        let mut tools = self.write();
        if tools.contains_key(&descriptor.name) {
            return Err(McpError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, "Tool registered");
        tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// The `tools/list` result entries, sorted by name for stable output.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        let tools = self.read();
        let mut entries: Vec<&ToolDescriptor> = tools.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether a tool with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Validate arguments against the tool's schema and invoke its handler.
    pub fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<String, McpError> {
        let (schema, handler) = {
            let tools = self.read();
            let tool = tools
                .get(name)
                .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
            (tool.input_schema.clone(), Arc::clone(&tool.handler))
        };

        validate_arguments(arguments, &schema)?;
        // The lock is released before the handler runs.
        handler(arguments)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ToolDescriptor>> {
        match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ToolDescriptor>> {
        match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
