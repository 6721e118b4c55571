//! Web search over DuckDuckGo Lite.
//!
//! The Lite endpoint serves plain HTML that a pair of regexes can pick
//! apart, so no HTML parser dependency is needed. The URL is cleared with
//! the security engine before every fetch; errors surfaced to the client
//! never include transport internals.

use crate::plugins::base::{Plugin, ToolDefinition, ToolResult};
use crate::security::engine::SecurityEngine;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const DUCKDUCKGO_LITE_URL: &str = "https://lite.duckduckgo.com/lite/";

const USER_AGENT: &str = "mcp-secure-local/1.0 (web search plugin)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_CAP: usize = 20;

static RESULT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a[^>]*class="[^"]*result[^"]*"[^>]*href="([^"]+)"[^>]*>([^<]+)</a>"#)
        .expect("result link regex")
});

static NOFOLLOW_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a[^>]*rel="nofollow"[^>]*href="([^"]+)"[^>]*>([^<]+)</a>"#)
        .expect("nofollow link regex")
});

static SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:a|td)[^>]*class="[^"]*(?:snippet|result-snippet)[^"]*"[^>]*>([^<]+)</(?:a|td)>"#)
        .expect("snippet regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

fn clean_text(text: &str) -> String {
    let unescaped = html_escape::decode_html_entities(text);
    WHITESPACE_RE.replace_all(unescaped.trim(), " ").to_string()
}

/// Extract result links and snippets from DuckDuckGo Lite HTML.
fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let links: Vec<(String, String)> = {
        let primary: Vec<_> = RESULT_LINK_RE
            .captures_iter(html)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        if primary.is_empty() {
            NOFOLLOW_LINK_RE
                .captures_iter(html)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .collect()
        } else {
            primary
        }
    };

    let snippets: Vec<String> = SNIPPET_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();

    links
        .into_iter()
        .take(max_results)
        .enumerate()
        .map(|(i, (url, title))| SearchHit {
            title: clean_text(&title),
            url,
            snippet: snippets.get(i).map(|s| clean_text(s)).unwrap_or_default(),
        })
        .collect()
}

fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for: {}", query);
    }
    let formatted: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "{}. {}\n   URL: {}\n   {}",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            )
        })
        .collect();
    format!("Search results for: {}\n\n{}", query, formatted.join("\n\n"))
}

pub struct WebSearchPlugin {
    client: reqwest::Client,
    base_url: String,
    engine: Option<Arc<SecurityEngine>>,
}

impl WebSearchPlugin {
    pub fn new(engine: Option<Arc<SecurityEngine>>) -> Self {
        Self::with_base_url(DUCKDUCKGO_LITE_URL, engine)
    }

    /// Point the plugin at a different endpoint. Tests use this with a
    /// local mock server.
    pub fn with_base_url(base_url: &str, engine: Option<Arc<SecurityEngine>>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.to_string(),
            engine,
        }
    }

    async fn search(&self, query: &str, max_results: usize) -> ToolResult {
        let encoded: String =
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("q", query)
                .append_pair("kl", "us-en")
                .finish();
        let request_url = format!("{}?{}", self.base_url, encoded);

        // The firewall has the final say on every outbound fetch.
        if let Some(engine) = &self.engine {
            if let Err(e) = engine.validate_url(&request_url) {
                return ToolResult::error(format!("Search blocked by policy: {}", e));
            }
        }

        debug!("websearch: fetching {}", self.base_url);
        let response = match self.client.get(&request_url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return ToolResult::error("Search timed out. Please try again.");
            }
            Err(e) => {
                warn!("websearch: request failed: {}", e);
                return ToolResult::error("Search failed. Please try again later.");
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ToolResult::error(format!("Search failed (HTTP {})", status.as_u16()));
        }

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("websearch: failed to read body: {}", e);
                return ToolResult::error("Search failed. Please try again later.");
            }
        };

        let hits = parse_results(&html, max_results);
        ToolResult::text(format_results(query, &hits))
    }
}

#[async_trait]
impl Plugin for WebSearchPlugin {
    fn name(&self) -> &str {
        "websearch"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "web_search",
                "Search the web using DuckDuckGo. Returns titles, URLs, and snippets.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query",
                            "maxLength": 500,
                        },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum number of results to return (default: 5)",
                            "default": 5,
                            "minimum": 1,
                            "maximum": 20,
                        },
                    },
                    "required": ["query"],
                }),
            )
            .with_aliases(&["search", "duckduckgo"])
            .with_intent_categories(&["research", "web search"]),
        ]
    }

    async fn execute(&self, tool_name: &str, arguments: &Value) -> anyhow::Result<ToolResult> {
        if tool_name != "web_search" {
            return Ok(ToolResult::error(format!("Unknown tool: {}", tool_name)));
        }

        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return Ok(ToolResult::error("Missing required argument: query"));
        };
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).clamp(1, MAX_RESULTS_CAP))
            .unwrap_or(DEFAULT_MAX_RESULTS);

        Ok(self.search(query, max_results).await)
    }
}
