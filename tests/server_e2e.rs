//! End-to-end JSON-RPC server tests: confirmation gate, elicitation,
//! rate limits, protocol negotiation.

use engram::config::ServerConfig;
use engram::context::ContextRegistry;
use engram::server::{McpServer, protocol};
use serde_json::{Value, json};
use std::sync::Arc;

fn server() -> McpServer {
    let config = ServerConfig::default();
    let registry = Arc::new(ContextRegistry::in_memory(config.clone()).unwrap());
    McpServer::new(registry, config)
}

async fn call(server: &McpServer, id: i64, tool: &str, arguments: Value) -> Value {
    let line = json!({
        "jsonrpc": "2.0", "id": id, "method": "tools/call",
        "params": { "name": tool, "arguments": arguments },
    })
    .to_string();
    let response = server.handle_line(&line).await.unwrap();
    serde_json::to_value(&response).unwrap()
}

#[tokio::test]
async fn destructive_confirmation_gate() {
    // Delete without confirm fails; with confirm it succeeds
    let server = server();
    call(
        &server,
        1,
        "create_entities",
        json!({ "entities": [{ "name": "X", "entity_type": "t" }] }),
    )
    .await;

    let rejected = call(&server, 2, "delete_entities", json!({ "names": ["X"] })).await;
    assert_eq!(rejected["error"]["data"]["type"], "confirmation_required");
    assert_eq!(rejected["error"]["code"], protocol::INVALID_PARAMS);

    let accepted = call(
        &server,
        3,
        "delete_entities",
        json!({ "names": ["X"], "confirm": true }),
    )
    .await;
    assert_eq!(accepted["result"]["structured_content"]["deleted"], 1);
}

#[tokio::test]
async fn elicitation_lists_missing_paths() {
    let server = server();
    let response = call(&server, 1, "shortest_path", json!({ "from": "a" })).await;
    let structured = &response["result"]["structured_content"];
    assert_eq!(structured["elicitation"], true);
    assert_eq!(structured["missing_fields"][0]["path"], "to");
    assert_eq!(structured["missing_fields"][0]["type"], "string");
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let server = server();
    let response = call(&server, 1, "made_up_tool", json!({})).await;
    assert_eq!(response["error"]["code"], protocol::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = server();
    let mut rejected = None;
    // The context class has the smallest interactive budget (50/min)
    for id in 0..60 {
        let response = call(&server, id, "list_contexts", json!({})).await;
        if response.get("error").is_some_and(|e| !e.is_null()) {
            rejected = Some(response);
            break;
        }
    }
    let rejected = rejected.expect("rate limit never tripped");
    assert_eq!(rejected["error"]["data"]["type"], "rate_limited");
    assert!(rejected["error"]["data"]["context"]["retry_after_secs"].as_u64() >= Some(1));
}

#[tokio::test]
async fn disabled_rate_limiting_passes_bursts() {
    let config = ServerConfig {
        rate_limiting_disabled: true,
        ..ServerConfig::default()
    };
    let registry = Arc::new(ContextRegistry::in_memory(config.clone()).unwrap());
    let server = McpServer::new(registry, config);

    for id in 0..100 {
        let response = call(&server, id, "list_contexts", json!({})).await;
        assert!(response.get("error").is_none_or(Value::is_null));
    }
}

#[tokio::test]
async fn error_data_is_structured() {
    let server = server();
    let response = call(
        &server,
        1,
        "create_relations",
        json!({ "relations": [{ "from": "Ghost", "to": "Phantom", "relation_type": "haunts" }] }),
    )
    .await;
    let data = &response["error"]["data"];
    assert_eq!(data["type"], "entity_not_found");
    assert_eq!(data["context"]["entity"], "ghost");
    assert!(data["suggestion"].as_str().is_some());
}

#[tokio::test]
async fn full_write_read_search_flow() {
    let server = server();
    call(
        &server,
        1,
        "create_entities",
        json!({
            "entities": [
                { "name": "Roadmap", "entity_type": "document",
                  "observations": [{ "type": "text", "text": "ship the beta in March" }] },
                { "name": "Beta Launch", "entity_type": "milestone" },
            ],
            "context": "work",
        }),
    )
    .await;
    call(
        &server,
        2,
        "create_relations",
        json!({
            "relations": [{ "from": "Roadmap", "to": "Beta Launch", "relation_type": "tracks" }],
            "context": "work",
        }),
    )
    .await;

    let graph = call(&server, 3, "read_graph", json!({ "context": "work" })).await;
    assert_eq!(graph["result"]["structured_content"]["total_entities"], 2);

    let search = call(
        &server,
        4,
        "search_nodes",
        json!({ "query": "beta", "context": "work" }),
    )
    .await;
    let results = search["result"]["structured_content"]["results"]
        .as_array()
        .unwrap();
    assert!(!results.is_empty());
    // Name match ranks the milestone first
    assert_eq!(results[0]["entity"]["name"], "Beta Launch");

    let path = call(
        &server,
        5,
        "shortest_path",
        json!({ "from": "Roadmap", "to": "Beta Launch", "context": "work" }),
    )
    .await;
    assert_eq!(path["result"]["structured_content"]["found"], true);
}

#[tokio::test]
async fn initialize_mismatch_message_is_greppable() {
    let server = server();
    let line = json!({
        "jsonrpc": "2.0", "id": 9, "method": "initialize",
        "params": { "protocolVersion": "2020-01-01" },
    })
    .to_string();
    let response = server.handle_line(&line).await.unwrap();
    let message = response.error.unwrap().message;
    assert!(message.contains("Protocol version mismatch"));
}
