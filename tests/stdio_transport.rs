//! End-to-end tests for the line transport over an in-memory pipe.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use mcp_tool_server::mcp::server::McpServer;
use mcp_tool_server::mcp::transport::LineTransport;
use mcp_tool_server::tools::builtin_tools;

async fn write_line(writer: &mut (impl AsyncWriteExt + Unpin), message: Value) {
    writer
        .write_all(format!("{message}\n").as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slow_call_does_not_block_later_requests() {
    let (client, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, mut client_write) = tokio::io::split(client);

    let server = McpServer::builder().tools(builtin_tools()).build().unwrap();
    let serve = tokio::spawn(async move {
        let dispatcher = server.dispatcher();
        LineTransport::new(BufReader::new(server_read), server_write)
            .serve(&dispatcher, std::future::pending())
            .await
            .map(|_| ())
    });

    write_line(
        &mut client_write,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
    )
    .await;
    write_line(
        &mut client_write,
        json!({
            "jsonrpc": "2.0",
            "id": "slow",
            "method": "tools/call",
            "params": { "name": "delay", "arguments": { "text": "late", "ms": 300 } }
        }),
    )
    .await;
    write_line(
        &mut client_write,
        json!({ "jsonrpc": "2.0", "id": "fast", "method": "ping" }),
    )
    .await;

    let mut lines = BufReader::new(client_read).lines();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        ids.push(reply["id"].clone());
    }

    // The ping overtakes the slow tool call
    assert_eq!(ids, [json!(1), json!("fast"), json!("slow")]);

    client_write.shutdown().await.unwrap();
    drop(client_write);
    serve.await.unwrap().unwrap();
}
