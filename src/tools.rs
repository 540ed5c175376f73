//! Tool export.
//!
//! Every assembled reference — the chunk store included — is exported as a
//! named, invocable tool for external agent runtimes, discoverable via
//! `GET /tools/list` and callable via `POST /tools/{name}`. Tool names pass
//! through the configured prefix so several assistants can share one
//! runtime without collisions.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::references::{LlmReference, ReferenceCatalog};

/// A tool an external agent can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`), prefix already applied.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters (function-calling style).
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Serializable tool descriptor for `GET /tools/list`.
#[derive(Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Exposes one retrieval reference as a `{ query }` tool.
struct ReferenceTool {
    name: String,
    reference: Arc<dyn LlmReference>,
}

#[async_trait]
impl Tool for ReferenceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.reference.description()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Retrieval query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }

        let material = self.reference.retrieve(query).await?;
        Ok(serde_json::json!({ "material": material }))
    }
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// One tool per catalog reference, names run through `prefix`.
    pub fn from_catalog(catalog: &ReferenceCatalog, prefix: &str) -> Self {
        let mut registry = Self::new();
        for reference in catalog.references() {
            registry.register(Box::new(ReferenceTool {
                name: format!("{}{}", prefix, reference.name()),
                reference: reference.clone(),
            }));
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
