//! Web search plugin against a local mock endpoint, with the firewall in
//! the loop.

use serde_json::json;
use std::sync::Arc;
use toolgate::plugins::base::Plugin;
use toolgate::plugins::websearch::WebSearchPlugin;
use toolgate::policy::parse_policy;
use toolgate::security::engine::SecurityEngine;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LITE_HTML: &str = r#"
<html><body><table>
<tr><td><a rel="nofollow" href="https://www.rust-lang.org/" class="result-link">Rust Programming Language</a></td></tr>
<tr><td class="result-snippet">A language empowering everyone.</td></tr>
</table></body></html>
"#;

fn loopback_engine() -> Arc<SecurityEngine> {
    let policy =
        parse_policy("version: \"1.0\"\nnetwork:\n  allowed_ranges: [\"127.0.0.0/8\"]\n").unwrap();
    Arc::new(SecurityEngine::new(Arc::new(policy)).unwrap())
}

#[tokio::test]
async fn search_returns_formatted_results() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lite/"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LITE_HTML))
        .mount(&mock)
        .await;

    let plugin =
        WebSearchPlugin::with_base_url(&format!("{}/lite/", mock.uri()), Some(loopback_engine()));
    let result = plugin
        .execute("web_search", &json!({"query": "rust"}))
        .await
        .unwrap();

    assert!(!result.is_error, "{}", result.text_content());
    let text = result.text_content();
    assert!(text.contains("Search results for: rust"));
    assert!(text.contains("1. Rust Programming Language"));
    assert!(text.contains("https://www.rust-lang.org/"));
}

#[tokio::test]
async fn http_error_is_sanitized() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let plugin =
        WebSearchPlugin::with_base_url(&format!("{}/lite/", mock.uri()), Some(loopback_engine()));
    let result = plugin
        .execute("web_search", &json!({"query": "rust"}))
        .await
        .unwrap();

    assert!(result.is_error);
    assert_eq!(result.text_content(), "Search failed (HTTP 500)");
}

#[tokio::test]
async fn no_results_message() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&mock)
        .await;

    let plugin =
        WebSearchPlugin::with_base_url(&format!("{}/lite/", mock.uri()), Some(loopback_engine()));
    let result = plugin
        .execute("web_search", &json!({"query": "obscure"}))
        .await
        .unwrap();

    assert!(!result.is_error);
    assert_eq!(result.text_content(), "No results found for: obscure");
}

#[tokio::test]
async fn firewall_blocks_disallowed_endpoint() {
    // Engine with no allowed ranges: even the mock's loopback address is
    // denied, and the request never goes out.
    let policy = parse_policy("version: \"1.0\"\n").unwrap();
    let engine = Arc::new(SecurityEngine::new(Arc::new(policy)).unwrap());

    let mock = MockServer::start().await;
    let plugin = WebSearchPlugin::with_base_url(&format!("{}/lite/", mock.uri()), Some(engine));
    let result = plugin
        .execute("web_search", &json!({"query": "rust"}))
        .await
        .unwrap();

    assert!(result.is_error);
    assert!(result.text_content().contains("blocked by policy"));
    assert!(mock.received_requests().await.unwrap().is_empty());
}
