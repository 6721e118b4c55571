use super::*;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

struct SearchPlugin;

#[async_trait]
impl Plugin for SearchPlugin {
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
                "Search the web",
                json!({"type": "object", "properties": {"query": {"type": "string"}}}),
            )
            .with_aliases(&["google", "lookup"])
            .with_intent_categories(&["research", "web browsing"]),
        ]
    }
    async fn execute(&self, _t: &str, _a: &Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::text("results"))
    }
}

struct OfflinePlugin;

#[async_trait]
impl Plugin for OfflinePlugin {
    fn name(&self) -> &str {
        "offline"
    }
    fn version(&self) -> &str {
        "0.2.0"
    }
    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "offline_tool",
            "Needs configuration",
            json!({"type": "object"}),
        )]
    }
    async fn execute(&self, _t: &str, _a: &Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::text("unreachable"))
    }
    fn is_available(&self) -> bool {
        false
    }
    fn availability_hint(&self) -> String {
        "set OFFLINE_API_KEY to enable".into()
    }
}

fn discovery_setup() -> DiscoveryPlugin {
    let dispatcher = ToolDispatcher::new();
    dispatcher.register(Arc::new(SearchPlugin));
    dispatcher.register(Arc::new(OfflinePlugin));
    DiscoveryPlugin::new(dispatcher)
}

async fn run(discovery: &DiscoveryPlugin, tool: &str, args: Value) -> Value {
    let result = discovery.execute(tool, &args).await.unwrap();
    assert!(!result.is_error, "unexpected error: {}", result.text_content());
    serde_json::from_str(&result.text_content()).unwrap()
}

#[tokio::test]
async fn search_by_query_matches_name() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"query": "web_search"})).await;
    let names: Vec<&str> = out
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["web_search"]);
}

#[tokio::test]
async fn search_matches_aliases_case_insensitively() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"query": "GOOGLE"})).await;
    assert_eq!(out.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn search_matches_description() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"query": "the web"})).await;
    assert_eq!(out[0]["name"], "web_search");
}

#[tokio::test]
async fn intent_filter_is_substring_match() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"intent": "browsing"})).await;
    assert_eq!(out.as_array().unwrap().len(), 1);
    let out = run(&discovery, "search_tools", json!({"intent": "databases"})).await;
    assert!(out.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn category_filter_restricts_to_one_plugin() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"category": "websearch"})).await;
    assert_eq!(out.as_array().unwrap().len(), 1);
    assert_eq!(out[0]["name"], "web_search");
}

#[tokio::test]
async fn name_detail_level_returns_strings() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({"detail_level": "name"})).await;
    assert!(out.as_array().unwrap().iter().all(Value::is_string));
}

#[tokio::test]
async fn full_detail_level_includes_schema() {
    let discovery = discovery_setup();
    let out = run(
        &discovery,
        "search_tools",
        json!({"query": "web_search", "detail_level": "full"}),
    )
    .await;
    assert!(out[0]["inputSchema"]["properties"]["query"].is_object());
}

#[tokio::test]
async fn unavailable_plugins_hidden_by_default() {
    let discovery = discovery_setup();
    let out = run(&discovery, "search_tools", json!({})).await;
    let names: Vec<&str> = out
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(!names.contains(&"offline_tool"));
}

#[tokio::test]
async fn include_unavailable_adds_flag_and_hint() {
    let discovery = discovery_setup();
    let out = run(
        &discovery,
        "search_tools",
        json!({"include_unavailable": true}),
    )
    .await;
    let offline = out
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "offline_tool")
        .expect("offline tool listed");
    assert_eq!(offline["available"], false);
    assert_eq!(offline["availability_hint"], "set OFFLINE_API_KEY to enable");

    let available = out
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "web_search")
        .unwrap();
    assert_eq!(available["available"], true);
    assert_eq!(available["availability_hint"], "");
}

#[tokio::test]
async fn list_categories_reports_per_plugin() {
    let discovery = discovery_setup();
    let out = run(&discovery, "list_categories", json!({})).await;
    let cats = out.as_array().unwrap();
    assert_eq!(cats.len(), 2);

    let search = cats.iter().find(|c| c["category"] == "websearch").unwrap();
    assert_eq!(search["version"], "1.0.0");
    assert_eq!(search["tool_count"], 1);
    assert_eq!(search["tools"][0], "web_search");
    assert_eq!(search["available"], true);

    let offline = cats.iter().find(|c| c["category"] == "offline").unwrap();
    assert_eq!(offline["available"], false);
    assert!(
        offline["availability_hint"]
            .as_str()
            .unwrap()
            .contains("OFFLINE_API_KEY")
    );
}

#[tokio::test]
async fn unknown_tool_is_an_error_result() {
    let discovery = discovery_setup();
    let result = discovery.execute("bogus", &json!({})).await.unwrap();
    assert!(result.is_error);
}
