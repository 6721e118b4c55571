//! Connection lifecycle: the initialize/initialized handshake and the state
//! gate every other method must pass.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Protocol version advertised when the client does not request one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "mcp-secure-local";
pub const SERVER_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Shutdown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Connection is shutdown")]
    Shutdown,
    #[error("Connection is not ready")]
    NotReady,
    #[error("Server already initialized")]
    AlreadyInitialized,
    #[error("Server not initializing")]
    NotInitializing,
}

/// Client identity from the initialize request. Retained for inspection;
/// never used for enforcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

pub struct LifecycleManager {
    state: LifecycleState,
    client_info: Option<ClientInfo>,
    client_capabilities: Option<Value>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            client_info: None,
            client_capabilities: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    pub fn client_capabilities(&self) -> Option<&Value> {
        self.client_capabilities.as_ref()
    }

    pub fn require_ready(&self) -> Result<(), ProtocolError> {
        match self.state {
            LifecycleState::Shutdown => Err(ProtocolError::Shutdown),
            LifecycleState::Ready => Ok(()),
            _ => Err(ProtocolError::NotReady),
        }
    }

    /// Handle the initialize request. Accepted only in `Uninitialized`.
    /// The client's requested protocol version is echoed back verbatim.
    pub fn handle_initialize(
        &mut self,
        params: &Map<String, Value>,
    ) -> Result<Value, ProtocolError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(ProtocolError::AlreadyInitialized);
        }

        let negotiated_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION)
            .to_string();

        self.client_info = params
            .get("clientInfo")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        self.client_capabilities = Some(
            params
                .get("capabilities")
                .cloned()
                .unwrap_or_else(|| json!({})),
        );

        self.state = LifecycleState::Initializing;

        Ok(json!({
            "protocolVersion": negotiated_version,
            "capabilities": {
                "tools": {
                    "listChanged": true,
                },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
            },
        }))
    }

    /// Handle the initialized notification. Accepted only in `Initializing`.
    pub fn handle_initialized(&mut self) -> Result<(), ProtocolError> {
        if self.state != LifecycleState::Initializing {
            return Err(ProtocolError::NotInitializing);
        }
        self.state = LifecycleState::Ready;
        Ok(())
    }

    pub fn handle_shutdown(&mut self) {
        self.state = LifecycleState::Shutdown;
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
