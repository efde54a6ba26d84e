//! MCP test server binary for integration tests
//!
//! This binary implements a minimal MCP server that communicates over
//! stdin/stdout using newline-delimited JSON (the stdio transport protocol).
//! It is used exclusively by integration tests to exercise `McpClient` and
//! the CLI against a real child process.
//!
//! # Handled Methods
//!
//! - `initialize` -- responds with protocol version `2024-11-05` and a
//!   `serverInfo` whose name is taken from `MCP_TEST_SERVER_NAME` (default
//!   `mcp-test-server`).
//! - `notifications/initialized` -- acknowledged silently (no response).
//! - `tools/list` -- returns the tools below.
//! - `tools/call`:
//!   - `echo` -- echoes back the `message` argument.
//!   - `search_files` -- fails with JSON-RPC error `-32000 not found`.
//!   - `inspect_args` -- returns its raw arguments as JSON text. Declares a
//!     `file.path` property so clients must sanitize and restore the key.
//!   - `report_error` -- returns a result with `isError: true`.
//!   - `split` -- writes its response in two flushed halves.
//!   - `ping_first` -- sends a `ping` to the client and answers only once the
//!     matching `pong` arrives.
//!   - `exit` -- exits with status 1 without answering.
//! - `pong` from the client -- releases a pending `ping_first` call.
//! - All other methods -- returns a JSON-RPC `-32601 Method not found` error.
//!
//! One line is written to stderr at startup.

use std::io::{self, BufRead, Write};
use std::time::Duration;

const PING_ID: &str = "srv-ping-1";

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    eprintln!("mcp_test_server: ready");

    let server_name =
        std::env::var("MCP_TEST_SERVER_NAME").unwrap_or_else(|_| "mcp-test-server".to_string());
    // Id of a `ping_first` call waiting for our probe to be acknowledged.
    let mut awaiting_pong: Option<serde_json::Value> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&serde_json::Value::Null, -32700, "Parse error");
                if send(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        if method == "notifications/initialized" {
            continue;
        }

        if method == "pong" {
            if id == PING_ID {
                if let Some(call_id) = awaiting_pong.take() {
                    if send(&mut out, &text_result(&call_id, "pong received", false)).is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id, &server_name),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => {
                let tool_name = request
                    .pointer("/params/name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("");
                match tool_name {
                    "exit" => std::process::exit(1),
                    "split" => {
                        if send_split(&mut out, &text_result(&id, "split ok", false)).is_err() {
                            break;
                        }
                        continue;
                    }
                    "ping_first" => {
                        awaiting_pong = Some(id);
                        serde_json::json!({ "jsonrpc": "2.0", "method": "ping", "id": PING_ID })
                    }
                    _ => handle_tools_call(&id, &request),
                }
            }
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if send(&mut out, &response).is_err() {
            break;
        }
    }
}

fn send(out: &mut impl Write, message: &serde_json::Value) -> io::Result<()> {
    writeln!(out, "{}", message)?;
    out.flush()
}

/// Write one message in two separately flushed halves.
fn send_split(out: &mut impl Write, message: &serde_json::Value) -> io::Result<()> {
    let line = format!("{}\n", message);
    let (head, tail) = line.as_bytes().split_at(line.len() / 2);
    out.write_all(head)?;
    out.flush()?;
    std::thread::sleep(Duration::from_millis(50));
    out.write_all(tail)?;
    out.flush()
}

/// Handle the `initialize` request.
fn handle_initialize(id: &serde_json::Value, server_name: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": server_name,
                "version": "0.1.0"
            }
        }
    })
}

/// Handle the `tools/list` request.
fn handle_tools_list(id: &serde_json::Value) -> serde_json::Value {
    let simple = |name: &str, description: &str| {
        serde_json::json!({
            "name": name,
            "description": description,
            "inputSchema": { "type": "object", "properties": {} }
        })
    };

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "message": {
                                "type": "string"
                            }
                        },
                        "required": ["message"]
                    }
                },
                {
                    "name": "inspect_args",
                    "description": "Returns its arguments",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "file.path": { "type": "string" }
                        },
                        "required": ["file.path"]
                    }
                },
                simple("search_files", "Always fails with not found"),
                simple("report_error", "Returns an error result"),
                simple("split", "Answers in two chunks"),
                simple("ping_first", "Probes the client before answering"),
                simple("exit", "Terminates the server")
            ]
        }
    })
}

/// Handle the remaining `tools/call` variants.
fn handle_tools_call(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let params = request.get("params").unwrap_or(&serde_json::Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    match tool_name {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("");
            text_result(id, message, false)
        }
        "inspect_args" => text_result(id, &arguments.to_string(), false),
        "search_files" => make_error(id, -32000, "not found"),
        "report_error" => text_result(id, "disk full", true),
        _ => make_error(id, -32602, &format!("Unknown tool: {}", tool_name)),
    }
}

fn text_result(id: &serde_json::Value, text: &str, is_error: bool) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [
                {
                    "type": "text",
                    "text": text
                }
            ],
            "isError": is_error
        }
    })
}

/// Build a JSON-RPC error response.
fn make_error(id: &serde_json::Value, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
