//! Top-level protocol dispatcher.
//!
//! One call to [`McpServer::handle_message`] processes one framed message:
//! parse, lifecycle gate, route, respond. Notifications produce no response.
//! The only errors that escape are unrecoverable ones (audit log write
//! failures); everything else becomes a JSON-RPC error response or an
//! `isError` tool result.

use crate::plugins::base::{Plugin, ToolResult};
use crate::plugins::discovery::DiscoveryPlugin;
use crate::plugins::dispatcher::ToolDispatcher;
use crate::policy::SecurityPolicy;
use crate::protocol::jsonrpc::{
    self, INTERNAL_ERROR, METHOD_NOT_FOUND, Message, Request, format_error, format_response,
};
use crate::protocol::lifecycle::LifecycleManager;
use crate::security::engine::{EngineError, SecurityEngine};
use anyhow::Result;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct McpServer {
    lifecycle: LifecycleManager,
    dispatcher: ToolDispatcher,
    engine: Arc<SecurityEngine>,
}

impl McpServer {
    /// Build a server around a policy. The discovery plugin is registered
    /// automatically; everything else is the caller's choice.
    pub fn new(policy: SecurityPolicy) -> std::io::Result<Self> {
        let engine = Arc::new(SecurityEngine::new(Arc::new(policy))?);
        let dispatcher = ToolDispatcher::new();
        dispatcher.register(Arc::new(DiscoveryPlugin::new(dispatcher.clone())));

        Ok(Self {
            lifecycle: LifecycleManager::new(),
            dispatcher,
            engine,
        })
    }

    pub fn engine(&self) -> Arc<SecurityEngine> {
        self.engine.clone()
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        info!("server: registered plugin '{}'", plugin.name());
        self.dispatcher.register(plugin);
    }

    /// Run plugin cleanup hooks. Called once when the serve loop ends.
    pub fn shutdown(&mut self) {
        self.lifecycle.handle_shutdown();
        self.dispatcher.cleanup();
    }

    /// Handle one raw message. Returns the response line to write, or
    /// `None` for notifications. `Err` means the process must exit.
    pub async fn handle_message(&mut self, raw: &str) -> Result<Option<String>> {
        let message = match jsonrpc::parse_message(raw) {
            Ok(message) => message,
            Err(e) => return Ok(Some(format_error(None, e.code, &e.message))),
        };

        match message {
            Message::Notification(notification) => {
                if notification.method == "notifications/initialized" {
                    // Out-of-order initialized notifications are ignored.
                    let _ = self.lifecycle.handle_initialized();
                } else {
                    debug!("server: ignoring notification '{}'", notification.method);
                }
                Ok(None)
            }
            Message::Request(request) => self.handle_request(request).await.map(Some),
        }
    }

    async fn handle_request(&mut self, request: Request) -> Result<String> {
        let params = request.params.unwrap_or_default();
        let id = request.id;

        if request.method == "initialize" {
            return Ok(match self.lifecycle.handle_initialize(&params) {
                Ok(result) => format_response(&id, result),
                Err(e) => format_error(Some(&id), INTERNAL_ERROR, &e.to_string()),
            });
        }

        if let Err(e) = self.lifecycle.require_ready() {
            return Ok(format_error(Some(&id), INTERNAL_ERROR, &e.to_string()));
        }

        match request.method.as_str() {
            "tools/list" => Ok(format_response(
                &id,
                json!({"tools": self.dispatcher.list_tools()}),
            )),
            "tools/call" => {
                let response = self.handle_tool_call(&params).await?;
                Ok(match response {
                    ToolCallOutcome::Result(result) => format_response(&id, result.to_wire()),
                    ToolCallOutcome::RateLimited(message) => {
                        format_error(Some(&id), INTERNAL_ERROR, &message)
                    }
                })
            }
            other => Ok(format_error(
                Some(&id),
                METHOD_NOT_FOUND,
                &format!("Unknown method: {}", other),
            )),
        }
    }

    async fn handle_tool_call(&self, params: &Map<String, Value>) -> Result<ToolCallOutcome> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self.engine.check_rate_limit(name) {
            Ok(()) => {}
            Err(EngineError::RateLimit(e)) => {
                return Ok(ToolCallOutcome::RateLimited(e.to_string()));
            }
            // Anything else out of a rate check is an audit write failure.
            Err(e) => return Err(e.into()),
        }

        let request_id = SecurityEngine::generate_request_id();
        self.engine
            .log_tool_execution(&request_id, name, &arguments)?;

        let started = Instant::now();
        let result = match self.dispatcher.call(name, &arguments).await {
            Ok(result) => result,
            // Not-found and execution failures surface as tool results with
            // sanitized messages, not protocol errors.
            Err(e) => ToolResult::error(e.to_string()),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = if result.is_error { "error" } else { "success" };
        self.engine
            .log_tool_result(&request_id, status, duration_ms)?;

        Ok(ToolCallOutcome::Result(result))
    }
}

enum ToolCallOutcome {
    Result(ToolResult),
    RateLimited(String),
}

#[cfg(test)]
mod tests;
