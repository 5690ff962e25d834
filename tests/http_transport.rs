//! Integration tests for the HTTP and SSE transports.
//!
//! Routers are driven in-process with `tower::ServiceExt::oneshot`; SSE
//! streams are read frame by frame from the response body.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_tool_server::mcp::server::McpServer;
use mcp_tool_server::mcp::transport::{HttpOptions, HttpTransport, SseOptions, SseTransport};
use mcp_tool_server::tools::builtin_tools;

// =============================================================================
// Helpers
// =============================================================================

fn server() -> McpServer {
    McpServer::builder().tools(builtin_tools()).build().unwrap()
}

fn transports(max_sessions: usize) -> (HttpTransport, SseTransport) {
    let server = server();
    let sse = SseTransport::new(
        server.clone(),
        SseOptions {
            max_sessions,
            ..SseOptions::default()
        },
    );
    let http = HttpTransport::new(server, HttpOptions::default()).with_sse(&sse);
    (http, sse)
}

async fn send(router: &Router, method: Method, uri: &str, body: impl Into<Body>) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn post(router: &Router, uri: &str, body: Value) -> Response {
    send(router, Method::POST, uri, body.to_string()).await
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Reads SSE frames from an open stream.
struct EventReader {
    stream: axum::body::BodyDataStream,
    buffer: String,
}

impl EventReader {
    fn new(response: Response) -> Self {
        Self {
            stream: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Next `(event, data)` pair, skipping keep-alive comments.
    async fn next(&mut self) -> (String, String) {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let mut event = String::new();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        event = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push_str(value.trim_start());
                    }
                }
                if !event.is_empty() || !data.is_empty() {
                    return (event, data);
                }
                continue;
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for an SSE event")
                .expect("stream ended")
                .unwrap();
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    async fn next_message(&mut self) -> Value {
        let (event, data) = self.next().await;
        assert_eq!(event, "message");
        serde_json::from_str(&data).unwrap()
    }
}

/// Opens a stream and returns it with the message URL from its first event.
async fn open_session(router: &Router) -> (EventReader, String) {
    let response = send(router, Method::GET, "/mcp/sse", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut reader = EventReader::new(response);
    let (event, endpoint) = reader.next().await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/mcp/sse/message?sessionId="));
    (reader, endpoint)
}

// =============================================================================
// HTTP Tests
// =============================================================================

#[tokio::test]
async fn test_http_round_trip() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let response = post(
        &router,
        "/mcp",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(body_json(response).await["id"], 1);

    let response = post(
        &router,
        "/mcp",
        json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": { "name": "echo", "arguments": { "text": "hi" } }
        }),
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["id"], "call-1");
    assert_eq!(reply["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_http_shares_one_session() {
    let (http, _sse) = transports(2);
    let router = http.router();
    let init = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" });

    let first = body_json(post(&router, "/mcp", init.clone()).await).await;
    assert!(first["result"].is_object());

    let second = body_json(post(&router, "/mcp", init).await).await;
    assert_eq!(second["error"]["code"], -32600);
    assert!(http.dispatcher().is_initialized());
}

#[tokio::test]
async fn test_http_notification_is_accepted_without_body() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let response = post(
        &router,
        "/mcp",
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_http_parse_error() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let response = send(&router, Method::POST, "/mcp", "{oops").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], -32700);
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn test_http_batch_is_rejected() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let response = post(&router, "/mcp", json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_http_missing_envelope_members() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let response = post(&router, "/mcp", json!({ "id": 1, "method": "initialize" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["id"], 1);

    let response = post(&router, "/mcp", json!({ "jsonrpc": "2.0", "id": 2 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32600);

    // A wrong version value is still a JSON-RPC level outcome
    let response = post(&router, "/mcp", json!({ "jsonrpc": "1.0", "id": 3, "method": "ping" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_http_body_limit() {
    let server = server();
    let http = HttpTransport::new(
        server,
        HttpOptions {
            max_body_bytes: 64,
            ..HttpOptions::default()
        },
    );
    let router = http.router();

    let response = post(
        &router,
        "/mcp",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "ping", "params": { "pad": "x".repeat(128) } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_server_info() {
    let (http, sse) = transports(2);
    let router = http.router();
    let _session = sse.create_session().unwrap();

    let response = send(&router, Method::GET, "/mcp", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let info = body_json(response).await;
    assert_eq!(info["name"], "mcp-tool-server");
    assert_eq!(info["status"], "ok");
    assert_eq!(info["protocolVersion"], "2025-03-26");
    assert_eq!(info["endpoints"]["mcp"], "/mcp");
    assert_eq!(info["endpoints"]["sse"], "/mcp/sse");
    assert_eq!(info["endpoints"]["sseMessage"], "/mcp/sse/message");
    assert_eq!(info["tools"].as_array().unwrap().len(), 3);
    assert_eq!(info["sessions"], json!({ "open": 1, "max": 2 }));
}

// =============================================================================
// SSE Tests
// =============================================================================

#[tokio::test]
async fn test_sse_session_flow() {
    let (http, sse) = transports(2);
    let router = http.router();

    let (mut events, endpoint) = open_session(&router).await;
    assert_eq!(sse.session_count(), 1);

    let response = post(
        &router,
        &endpoint,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let reply = events.next_message().await;
    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["serverInfo"].is_object());

    let response = post(
        &router,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "echo", "arguments": { "text": "over sse" } }
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let reply = events.next_message().await;
    assert_eq!(reply["id"], 2);
    let text = reply["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({ "echo": "over sse" }));
}

#[tokio::test]
async fn test_sse_sessions_are_isolated() {
    let (http, _sse) = transports(2);
    let router = http.router();

    let (mut first, first_endpoint) = open_session(&router).await;
    let (mut second, second_endpoint) = open_session(&router).await;

    post(
        &router,
        &first_endpoint,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
    )
    .await;
    assert!(first.next_message().await["result"].is_object());

    post(
        &router,
        &second_endpoint,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await;
    assert_eq!(second.next_message().await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_sse_capacity() {
    let (http, sse) = transports(2);
    let router = http.router();

    let _first = open_session(&router).await;
    let _second = open_session(&router).await;

    let response = send(&router, Method::GET, "/mcp/sse", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(sse.session_count(), 2);
}

#[tokio::test]
async fn test_sse_message_requires_known_session() {
    let (http, _sse) = transports(2);
    let router = http.router();
    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

    let response = post(&router, "/mcp/sse/message", ping.clone()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(&router, "/mcp/sse/message?sessionId=unknown", ping).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_parse_error_answers_in_body() {
    let (http, _sse) = transports(2);
    let router = http.router();
    let (_events, endpoint) = open_session(&router).await;

    let response = send(&router, Method::POST, &endpoint, "not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn test_sse_delete_session() {
    let (http, sse) = transports(2);
    let router = http.router();
    let (_events, endpoint) = open_session(&router).await;
    let id = endpoint.rsplit('=').next().unwrap().to_string();

    let uri = format!("/mcp/sse?sessionId={id}");
    let response = send(&router, Method::DELETE, &uri, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(sse.session_count(), 0);

    let response = send(&router, Method::DELETE, &uri, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&router, Method::DELETE, "/mcp/sse", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_disconnect_closes_session() {
    let (http, sse) = transports(2);
    let router = http.router();

    let (events, _endpoint) = open_session(&router).await;
    assert_eq!(sse.session_count(), 1);
    drop(events);
    assert_eq!(sse.session_count(), 0);
}

#[tokio::test]
async fn test_sse_destroy_ends_streams() {
    let (http, sse) = transports(2);
    let router = http.router();
    let (mut events, _endpoint) = open_session(&router).await;

    sse.destroy();
    assert_eq!(sse.session_count(), 0);

    let end = tokio::time::timeout(Duration::from_secs(5), events.stream.next())
        .await
        .unwrap();
    assert!(end.is_none());
}
