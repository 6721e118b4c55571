//! Plugin contract and the wire shapes tools produce.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One block of tool output. Text is the only variant the core generates;
/// the tagged encoding leaves room for richer plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: content.into(),
            }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Wire representation for a `tools/call` result.
    pub fn to_wire(&self) -> Value {
        json!({
            "content": self.content,
            "isError": self.is_error,
        })
    }

    /// Concatenated text of all text blocks. Convenience for tests and
    /// discovery output handling.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Definition of a tool advertised by a plugin.
///
/// `aliases` and `intent_categories` feed the discovery plugin's matching;
/// they are not part of the `tools/list` wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub aliases: Vec<String>,
    pub intent_categories: Vec<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            aliases: Vec::new(),
            intent_categories: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_intent_categories(mut self, categories: &[&str]) -> Self {
        self.intent_categories = categories.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Wire representation for `tools/list`.
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// A unit of capability extension. Plugins own their tools' execution; the
/// dispatcher guarantees rate limiting has passed before `execute` is
/// called, but argument sanitization is the plugin's responsibility — a
/// plugin whose schema carries `path` or `command` fields must route its
/// arguments through the security engine itself.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Lowercase plugin identifier, unique per process.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn tools(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, tool_name: &str, arguments: &Value) -> anyhow::Result<ToolResult>;

    /// Release held resources (connection pools, file handles, databases).
    fn cleanup(&self) {}

    fn is_available(&self) -> bool {
        true
    }

    /// Human-readable hint shown when `is_available` is false, e.g. which
    /// configuration is missing.
    fn availability_hint(&self) -> String {
        String::new()
    }
}
