//! Tool dispatcher: routes tool calls to the owning plugin.

use crate::plugins::base::{Plugin, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The wire-visible message deliberately names only the tool. The
    /// plugin's original error may carry filesystem paths, IPs, or
    /// credentials; it stays in-process as the source for debugging.
    #[error("Tool '{tool}' execution failed")]
    ExecutionFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
struct Inner {
    plugins: Vec<Arc<dyn Plugin>>,
    tool_map: HashMap<String, Arc<dyn Plugin>>,
}

/// Cheaply cloneable registry. The lock is never held across an await;
/// plugin lookups clone the `Arc` out before executing.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    inner: Arc<RwLock<Inner>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin and index its tools. A duplicate tool name is
    /// last-writer-wins, with a warning.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let mut inner = self.inner.write().expect("dispatcher lock");
        for tool in plugin.tools() {
            if inner.tool_map.contains_key(&tool.name) {
                warn!(
                    "dispatcher: overwriting duplicate tool '{}' (plugin '{}')",
                    tool.name,
                    plugin.name()
                );
            }
            inner.tool_map.insert(tool.name.clone(), plugin.clone());
        }
        inner.plugins.push(plugin);
    }

    /// All tool definitions in wire format, in registration order.
    pub fn list_tools(&self) -> Vec<Value> {
        let inner = self.inner.read().expect("dispatcher lock");
        inner
            .plugins
            .iter()
            .flat_map(|plugin| plugin.tools())
            .map(|tool| tool.to_wire())
            .collect()
    }

    /// Snapshot of registered plugins, in registration order.
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.inner
            .read()
            .expect("dispatcher lock")
            .plugins
            .clone()
    }

    /// Input schema of a tool, if registered.
    pub fn tool_schema(&self, tool_name: &str) -> Option<Value> {
        let inner = self.inner.read().expect("dispatcher lock");
        let plugin = inner.tool_map.get(tool_name)?;
        plugin
            .tools()
            .into_iter()
            .find(|t| t.name == tool_name)
            .map(|t| t.input_schema)
    }

    /// Execute a tool. Any plugin failure is wrapped with a sanitized
    /// message; the cause is preserved on the error chain.
    pub async fn call(&self, tool_name: &str, arguments: &Value) -> Result<ToolResult, DispatchError> {
        let plugin = {
            let inner = self.inner.read().expect("dispatcher lock");
            inner
                .tool_map
                .get(tool_name)
                .cloned()
                .ok_or_else(|| DispatchError::ToolNotFound(tool_name.to_string()))?
        };

        plugin.execute(tool_name, arguments).await.map_err(|e| {
            error!("dispatcher: tool '{}' failed: {:#}", tool_name, e);
            DispatchError::ExecutionFailed {
                tool: tool_name.to_string(),
                source: e,
            }
        })
    }

    /// Run every plugin's cleanup hook.
    pub fn cleanup(&self) {
        let plugins = self.plugins();
        for plugin in plugins {
            plugin.cleanup();
        }
    }
}
