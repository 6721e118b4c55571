//! Progressive tool discovery.
//!
//! Lets a client search and browse the tool catalog on demand instead of
//! loading every schema into its context window up front.

use crate::plugins::base::{Plugin, ToolDefinition, ToolResult};
use crate::plugins::dispatcher::ToolDispatcher;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct DiscoveryPlugin {
    dispatcher: ToolDispatcher,
}

impl DiscoveryPlugin {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    fn search_tools(&self, arguments: &Value) -> ToolResult {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let category = arguments
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let intent = arguments
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let detail_level = arguments
            .get("detail_level")
            .and_then(Value::as_str)
            .unwrap_or("summary");
        let include_unavailable = arguments
            .get("include_unavailable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // (tool, available, hint)
        let mut matches: Vec<(ToolDefinition, bool, String)> = Vec::new();
        for plugin in self.dispatcher.plugins() {
            if !category.is_empty() && plugin.name().to_lowercase() != category {
                continue;
            }

            let available = plugin.is_available();
            let hint = plugin.availability_hint();
            if !available && !include_unavailable {
                continue;
            }

            for tool in plugin.tools() {
                if !intent.is_empty()
                    && !tool
                        .intent_categories
                        .iter()
                        .any(|c| c.to_lowercase().contains(&intent))
                {
                    continue;
                }

                if !query.is_empty() {
                    let name_match = tool.name.to_lowercase().contains(&query);
                    let desc_match = tool.description.to_lowercase().contains(&query);
                    let alias_match = tool
                        .aliases
                        .iter()
                        .any(|a| a.to_lowercase().contains(&query));
                    if !(name_match || desc_match || alias_match) {
                        continue;
                    }
                }

                matches.push((tool, available, hint.clone()));
            }
        }

        let result: Value = match detail_level {
            "name" => matches
                .iter()
                .map(|(tool, _, _)| Value::String(tool.name.clone()))
                .collect(),
            "full" => matches
                .iter()
                .map(|(tool, available, hint)| {
                    let mut entry = tool.to_wire();
                    if include_unavailable {
                        entry["available"] = json!(available);
                        entry["availability_hint"] =
                            json!(if *available { "" } else { hint.as_str() });
                    }
                    entry
                })
                .collect(),
            // Unknown levels fall back to the summary shape.
            _ => matches
                .iter()
                .map(|(tool, available, hint)| {
                    let mut entry = json!({
                        "name": tool.name,
                        "description": tool.description,
                    });
                    if include_unavailable {
                        entry["available"] = json!(available);
                        entry["availability_hint"] =
                            json!(if *available { "" } else { hint.as_str() });
                    }
                    entry
                })
                .collect(),
        };

        match serde_json::to_string_pretty(&result) {
            Ok(text) => ToolResult::text(text),
            Err(e) => ToolResult::error(format!("Failed to encode search results: {}", e)),
        }
    }

    fn list_categories(&self) -> ToolResult {
        let categories: Vec<Value> = self
            .dispatcher
            .plugins()
            .iter()
            .map(|plugin| {
                let tools = plugin.tools();
                let available = plugin.is_available();
                let hint = plugin.availability_hint();
                json!({
                    "category": plugin.name(),
                    "version": plugin.version(),
                    "tool_count": tools.len(),
                    "tools": tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                    "available": available,
                    "availability_hint": if available { String::new() } else { hint },
                })
            })
            .collect();

        match serde_json::to_string_pretty(&categories) {
            Ok(text) => ToolResult::text(text),
            Err(e) => ToolResult::error(format!("Failed to encode categories: {}", e)),
        }
    }
}

#[async_trait]
impl Plugin for DiscoveryPlugin {
    fn name(&self) -> &str {
        "discovery"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "search_tools",
                "Search for available tools by keyword or category. \
                 Use detail_level to control how much information is returned: \
                 'name' for just tool names, 'summary' for names and descriptions, \
                 'full' for complete definitions including input schemas.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Keyword to search for in tool names, descriptions, and aliases",
                        },
                        "category": {
                            "type": "string",
                            "description": "Filter by plugin category (e.g., 'bugtracker')",
                        },
                        "intent": {
                            "type": "string",
                            "description": "Filter by intent category (e.g., 'bug tracking', 'research')",
                        },
                        "detail_level": {
                            "type": "string",
                            "enum": ["name", "summary", "full"],
                            "description": "Level of detail to return (default: 'summary')",
                            "default": "summary",
                        },
                        "include_unavailable": {
                            "type": "boolean",
                            "description": "Include tools from unavailable plugins (default: false). When true, results include availability status.",
                            "default": false,
                        },
                    },
                }),
            ),
            ToolDefinition::new(
                "list_categories",
                "List all available tool categories (plugins) with their tool counts. \
                 Use this to discover what capabilities are available before searching.",
                json!({
                    "type": "object",
                    "properties": {},
                }),
            ),
        ]
    }

    async fn execute(&self, tool_name: &str, arguments: &Value) -> anyhow::Result<ToolResult> {
        match tool_name {
            "search_tools" => Ok(self.search_tools(arguments)),
            "list_categories" => Ok(self.list_categories()),
            other => Ok(ToolResult::error(format!("Unknown tool: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests;
