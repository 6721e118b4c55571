use super::*;
use crate::plugins::base::ToolDefinition;
use crate::policy::parse_policy;
use async_trait::async_trait;
use serde_json::json;

struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echoer"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "echo",
            "Echoes the input",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
            }),
        )]
    }
    async fn execute(&self, _tool: &str, arguments: &Value) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::text(format!(
            "Echo: {}",
            arguments["text"].as_str().unwrap_or("")
        )))
    }
}

fn server(yaml: &str) -> McpServer {
    let policy = parse_policy(yaml).unwrap();
    let server = McpServer::new(policy).unwrap();
    server.register_plugin(Arc::new(EchoPlugin));
    server
}

async fn send(server: &mut McpServer, raw: &str) -> Value {
    let response = server
        .handle_message(raw)
        .await
        .unwrap()
        .expect("expected a response");
    serde_json::from_str(&response).unwrap()
}

async fn handshake(server: &mut McpServer) {
    let init = r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#;
    let response = send(server, init).await;
    assert!(response.get("result").is_some());
    let none = server
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn initialize_happy_path() {
    let mut srv = server("version: \"1.0\"\n");
    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
    )
    .await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(response["result"]["serverInfo"]["name"], "mcp-secure-local");
    assert_eq!(response["result"]["serverInfo"]["version"], "1.0.0");
    assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], true);
}

#[tokio::test]
async fn call_before_initialize_rejected() {
    let mut srv = server("version: \"1.0\"\n");
    let response = send(&mut srv, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).await;
    assert_eq!(response["id"], 7);
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["message"], "Connection is not ready");
}

#[tokio::test]
async fn second_initialize_rejected() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":9,"method":"initialize","params":{}}"#,
    )
    .await;
    assert_eq!(response["error"]["code"], -32603);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("already initialized")
    );
}

#[tokio::test]
async fn tools_list_includes_discovery_and_plugins() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(&mut srv, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    // Discovery registers first, then user plugins in order.
    assert_eq!(names, vec!["search_tools", "list_categories", "echo"]);
    assert!(tools[2]["inputSchema"].is_object());
}

#[tokio::test]
async fn tools_call_returns_content() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#,
    )
    .await;
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(response["result"]["content"][0]["type"], "text");
    assert_eq!(response["result"]["content"][0]["text"], "Echo: hi");
}

#[tokio::test]
async fn unknown_tool_is_error_result_not_protocol_error() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
    )
    .await;
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(
        response["result"]["content"][0]["text"],
        "Tool not found: nope"
    );
}

#[tokio::test]
async fn unknown_method_not_found() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(&mut srv, r#"{"jsonrpc":"2.0","id":5,"method":"bogus/method"}"#).await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn parse_error_has_null_id() {
    let mut srv = server("version: \"1.0\"\n");
    let response = send(&mut srv, "{broken").await;
    assert!(response["id"].is_null());
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn notifications_produce_no_response() {
    let mut srv = server("version: \"1.0\"\n");
    let out = srv
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/whatever"}"#)
        .await
        .unwrap();
    assert!(out.is_none());
}

#[tokio::test]
async fn initialized_in_wrong_state_is_swallowed() {
    let mut srv = server("version: \"1.0\"\n");
    // Before initialize: silently ignored, and the server stays gated.
    let out = srv
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .unwrap();
    assert!(out.is_none());
    let response = send(&mut srv, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
    assert_eq!(response["error"]["code"], -32603);
}

#[tokio::test]
async fn response_id_echoes_string_ids() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":"req-abc","method":"tools/list"}"#,
    )
    .await;
    assert_eq!(response["id"], "req-abc");
}

#[tokio::test]
async fn rate_limit_surfaces_as_internal_error() {
    let mut srv = server("version: \"1.0\"\ntools:\n  rate_limits:\n    echo: 2\n");
    handshake(&mut srv).await;

    for id in [10, 11] {
        let response = send(
            &mut srv,
            &format!(
                r#"{{"jsonrpc":"2.0","id":{},"method":"tools/call","params":{{"name":"echo","arguments":{{"text":"x"}}}}}}"#,
                id
            ),
        )
        .await;
        assert!(response.get("result").is_some(), "call {} should pass", id);
    }

    let response = send(
        &mut srv,
        r#"{"jsonrpc":"2.0","id":12,"method":"tools/call","params":{"name":"echo","arguments":{"text":"x"}}}"#,
    )
    .await;
    assert_eq!(response["error"]["code"], -32603);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("echo")
    );
}

#[tokio::test]
async fn tool_call_without_params_is_tool_not_found() {
    let mut srv = server("version: \"1.0\"\n");
    handshake(&mut srv).await;
    let response = send(&mut srv, r#"{"jsonrpc":"2.0","id":6,"method":"tools/call"}"#).await;
    assert_eq!(response["result"]["isError"], true);
}
