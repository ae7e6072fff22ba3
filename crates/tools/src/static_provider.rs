//! In-process tool provider.

use async_trait::async_trait;
use salesdesk_core::error::ToolError;
use salesdesk_core::tool::{Tool, ToolProvider, ToolRegistry, ToolResult};
use std::sync::Arc;

/// Hands out a fresh registry over a fixed set of tools on every request.
#[derive(Clone, Default)]
pub struct StaticToolProvider {
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn registry(&self) -> Result<ToolRegistry, ToolError> {
        let mut registry = ToolRegistry::new();
        for tool in &self.tools {
            registry.register(Box::new(Shared(Arc::clone(tool))));
        }
        Ok(registry)
    }
}

/// Lets one tool instance sit in many registries.
struct Shared(Arc<dyn Tool>);

#[async_trait]
impl Tool for Shared {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.0.execute(arguments).await
    }
}
