//! Integration tests for MCP protocol handling.
//!
//! These tests verify the JSON-RPC 2.0 codec and the dispatcher end to end:
//! request/response handling, error responses, lifecycle management and
//! concurrent tool execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use mcp_tool_server::mcp::protocol::{self, ErrorCode, Message, RequestId};
use mcp_tool_server::mcp::registry::{FnTool, ToolError};
use mcp_tool_server::mcp::server::{Dispatcher, McpServer};
use mcp_tool_server::tools::builtin_tools;

// =============================================================================
// Helpers
// =============================================================================

fn server() -> McpServer {
    McpServer::builder()
        .tools(builtin_tools())
        .tool(FnTool::new("fail", "Always fails", |_args: Value| async move {
            Err(ToolError::failed("boom"))
        }))
        .build()
        .unwrap()
}

async fn request(dispatcher: &Dispatcher, id: i64, method: &str, params: Value) -> Message {
    dispatcher
        .dispatch(Message::request(id, method, Some(params)))
        .await
        .expect("requests are always answered")
}

async fn initialized() -> Dispatcher {
    let dispatcher = server().dispatcher();
    let reply = request(
        &dispatcher,
        0,
        "initialize",
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        }),
    )
    .await;
    assert!(reply.error.is_none(), "initialize failed: {reply:?}");
    dispatcher
}

fn error_code(message: &Message) -> i32 {
    message.error.as_ref().expect("expected an error").code
}

/// The `text` content of a successful `tools/call`, parsed as JSON.
fn tool_output(message: &Message) -> Value {
    let result = message.result.as_ref().expect("expected a result");
    let text = result["content"][0]["text"].as_str().expect("text content");
    serde_json::from_str(text).unwrap()
}

// =============================================================================
// Protocol Parsing Tests
// =============================================================================

#[test]
fn test_parse_initialize_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "test-client",
                "version": "1.0.0"
            }
        }
    }"#;

    let message = protocol::deserialize(json).unwrap();
    assert!(message.is_request());
    assert_eq!(message.method.as_deref(), Some("initialize"));
    assert_eq!(message.id, Some(RequestId::Number(1)));
}

#[test]
fn test_parse_notification() {
    let json = r#"{
        "jsonrpc": "2.0",
        "method": "notifications/initialized"
    }"#;

    let message = protocol::deserialize(json).unwrap();
    assert!(message.is_notification());
    assert_eq!(message.method.as_deref(), Some("notifications/initialized"));
}

#[test]
fn test_parse_invalid_json() {
    let error = protocol::deserialize("not valid json").unwrap_err();
    assert!(error.is_parse_error());
}

#[test]
fn test_parse_missing_jsonrpc_version() {
    let json = r#"{
        "id": 1,
        "method": "test"
    }"#;

    let error = protocol::deserialize(json).unwrap_err();
    assert_eq!(error.error.code, ErrorCode::InvalidRequest.code());
    assert_eq!(error.id, Some(RequestId::Number(1)));
}

#[test]
fn test_serialize_preserves_string_id() {
    let message = Message::success(Some(RequestId::from("abc-1")), json!({ "ok": true }));
    let encoded = protocol::serialize(&message).unwrap();
    let decoded = protocol::deserialize(&encoded).unwrap();
    assert_eq!(decoded.id, Some(RequestId::String("abc-1".to_string())));
    assert_eq!(decoded.result, Some(json!({ "ok": true })));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_requests_before_initialize_are_rejected() {
    let dispatcher = server().dispatcher();

    let reply = request(&dispatcher, 1, "tools/list", json!({})).await;
    assert_eq!(error_code(&reply), ErrorCode::InvalidRequest.code());
    assert_eq!(reply.id, Some(RequestId::Number(1)));
    assert!(!dispatcher.is_initialized());
}

#[tokio::test]
async fn test_second_initialize_is_rejected() {
    let dispatcher = initialized().await;
    let before = dispatcher.session_state();

    let reply = request(
        &dispatcher,
        2,
        "initialize",
        json!({ "clientInfo": { "name": "other", "version": "2" } }),
    )
    .await;

    assert_eq!(error_code(&reply), ErrorCode::InvalidRequest.code());
    assert_eq!(dispatcher.session_state(), before);
    assert_eq!(
        dispatcher.session_state().client_info.unwrap().name,
        "test-client"
    );
}

#[tokio::test]
async fn test_initialize_reports_server_and_version() {
    let dispatcher = server().dispatcher();
    let reply = request(
        &dispatcher,
        1,
        "initialize",
        json!({ "protocolVersion": "2024-11-05" }),
    )
    .await;

    let result = reply.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "mcp-tool-server");
    assert!(result["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn test_unknown_method() {
    let dispatcher = initialized().await;
    let reply = request(&dispatcher, 5, "resources/list", json!({})).await;
    assert_eq!(error_code(&reply), ErrorCode::MethodNotFound.code());
}

// =============================================================================
// Tool Tests
// =============================================================================

#[tokio::test]
async fn test_tools_list_in_registration_order() {
    let dispatcher = initialized().await;
    let reply = request(&dispatcher, 1, "tools/list", json!({})).await;

    let tools = reply.result.unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["echo", "counter", "delay", "fail"]);
    assert!(tools.iter().all(|t| t["inputSchema"].is_object()));
}

#[tokio::test]
async fn test_echo_call() {
    let dispatcher = initialized().await;
    let reply = request(
        &dispatcher,
        2,
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": "hi" } }),
    )
    .await;

    assert_eq!(reply.id, Some(RequestId::Number(2)));
    assert_eq!(tool_output(&reply), json!({ "echo": "hi" }));
}

#[tokio::test]
async fn test_unknown_tool() {
    let dispatcher = initialized().await;
    let reply = request(
        &dispatcher,
        3,
        "tools/call",
        json!({ "name": "nope", "arguments": {} }),
    )
    .await;

    let error = reply.error.unwrap();
    assert_eq!(error.code, ErrorCode::ToolNotFound.code());
    assert_eq!(error.message, "Tool not found: nope");
}

#[tokio::test]
async fn test_missing_tool_name() {
    let dispatcher = initialized().await;
    let reply = request(&dispatcher, 4, "tools/call", json!({ "arguments": {} })).await;
    assert_eq!(error_code(&reply), ErrorCode::InvalidParams.code());
}

#[tokio::test]
async fn test_bad_tool_arguments() {
    let dispatcher = initialized().await;
    let reply = request(
        &dispatcher,
        5,
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": 42 } }),
    )
    .await;
    assert_eq!(error_code(&reply), ErrorCode::InvalidParams.code());
}

#[tokio::test]
async fn test_failing_tool_keeps_session_alive() {
    let dispatcher = initialized().await;
    let reply = request(&dispatcher, 6, "tools/call", json!({ "name": "fail" })).await;

    let error = reply.error.unwrap();
    assert_eq!(error.code, ErrorCode::InternalError.code());
    assert!(error.message.contains("boom"));

    let reply = request(&dispatcher, 7, "ping", json!({})).await;
    assert_eq!(reply.result, Some(json!({})));
}

#[tokio::test]
async fn test_malformed_frame() {
    let dispatcher = initialized().await;
    let reply = dispatcher.handle_raw("{\"jsonrpc\": \"2.0\",").await.unwrap();
    assert_eq!(error_code(&reply), ErrorCode::ParseError.code());
    assert_eq!(reply.id, None);
    assert!(protocol::serialize(&reply).unwrap().contains("\"id\":null"));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_delays_overlap() {
    let dispatcher = Arc::new(initialized().await);
    let started = Instant::now();

    let calls = (0..10).map(|i| {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let text = format!("call-{i}");
            let reply = request(
                &dispatcher,
                i,
                "tools/call",
                json!({ "name": "delay", "arguments": { "text": text, "ms": 200 } }),
            )
            .await;
            (i, reply)
        })
    });
    let replies = futures::future::join_all(calls).await;

    // Ten sequential calls would take two seconds
    assert!(started.elapsed() < Duration::from_millis(1500));
    for joined in replies {
        let (i, reply) = joined.unwrap();
        assert_eq!(reply.id, Some(RequestId::Number(i)));
        assert_eq!(tool_output(&reply), json!({ "text": format!("call-{i}") }));
    }
}

#[tokio::test]
async fn test_sequential_counter_calls() {
    let dispatcher = initialized().await;

    let mut counts = Vec::new();
    for id in 1..=5 {
        let reply = request(&dispatcher, id, "tools/call", json!({ "name": "counter" })).await;
        counts.push(tool_output(&reply)["count"].as_u64().unwrap());
    }
    assert_eq!(counts, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_concurrent_counter_values_are_distinct() {
    let dispatcher = Arc::new(initialized().await);

    let calls = (1..=5).map(|i| {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            request(&dispatcher, i, "tools/call", json!({ "name": "counter" })).await
        })
    });

    let mut counts: Vec<u64> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|joined| tool_output(&joined.unwrap())["count"].as_u64().unwrap())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_dispatchers_do_not_share_state() {
    let server = server();
    let first = server.dispatcher();
    let second = server.dispatcher();

    request(&first, 1, "initialize", json!({})).await;
    assert!(first.is_initialized());
    assert!(!second.is_initialized());

    let reply = request(&second, 2, "ping", json!({})).await;
    assert_eq!(error_code(&reply), ErrorCode::InvalidRequest.code());
}
