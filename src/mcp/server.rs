use crate::app::App;
use crate::errors::{ErrorCode, McpError, ToolError};
use crate::mcp::catalog::{list_tools, validate_tool_args};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::services::logger::Logger;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "digikey-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tool failures travel back as a result with `isError: true` so the agent
/// can read kind, code and hint. Only protocol problems become JSON-RPC errors.
fn tool_error_result(tool: &str, error: &ToolError) -> Value {
    let body = serde_json::json!({
        "ok": false,
        "tool": tool,
        "error": error,
    });
    serde_json::json!({
        "content": [ { "type": "text", "text": serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()) } ],
        "isError": true,
    })
}

fn tool_success_result(payload: &Value) -> Value {
    serde_json::json!({
        "content": [ { "type": "text", "text": serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()) } ],
        "isError": false,
    })
}

pub struct McpServer {
    app: Arc<App>,
    logger: Logger,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        let logger = app.logger.child("mcp");
        Self { app, logger }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": list_tools() })
    }

    async fn handle_tools_call(&self, name: &str, args: Value) -> Result<Value, McpError> {
        validate_tool_args(name, &args)?;
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        match self.app.tool_executor.execute(name, args).await {
            Ok(payload) => Ok(tool_success_result(&payload)),
            Err(err) => Ok(tool_error_result(name, &err)),
        }
    }

    /// Answers one line of input. `None` means nothing is written back
    /// (notifications).
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::unaddressed(
                    ErrorCode::ParseError,
                    "Parse error",
                ))
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(req) => req,
            Err(_) => {
                return Some(JsonRpcResponse::unaddressed(
                    ErrorCode::InvalidRequest,
                    "Invalid request",
                ))
            }
        };
        self.handle_request(request).await
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            return None;
        }
        let id = request.id.clone()?;
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.handle_initialize()),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.handle_tools_list()),
            "tools/call" => {
                let params = request.params.as_object().cloned().unwrap_or_default();
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                if name.is_empty() {
                    JsonRpcResponse::failure(
                        id,
                        McpError::new(ErrorCode::InvalidParams, "Missing tool name"),
                    )
                } else {
                    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                    match self.handle_tools_call(name, args).await {
                        Ok(result) => JsonRpcResponse::success(id, result),
                        Err(err) => JsonRpcResponse::failure(id, err),
                    }
                }
            }
            _ => JsonRpcResponse::failure(
                id,
                McpError::new(ErrorCode::MethodNotFound, "Method not found"),
            ),
        };
        Some(response)
    }

    /// Reads requests line by line and answers each on its own task, so a slow
    /// upstream call never blocks `ping` or other tool calls. A single writer
    /// task owns the output stream.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_logger = self.logger.clone();
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);
            while let Some(payload) = rx.recv().await {
                let written = async {
                    writer.write_all(payload.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(err) = written {
                    writer_logger.error(
                        "Failed to write response",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                    break;
                }
            }
        });

        let mut in_flight = JoinSet::new();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                continue;
            }
            let server = self.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                if let Some(response) = server.handle_line(&trimmed).await {
                    let payload = serde_json::to_string(&response).unwrap_or_default();
                    let _ = tx.send(payload);
                }
            });
            while let Some(done) = in_flight.try_join_next() {
                if let Err(err) = done {
                    self.logger.error(
                        "Request task failed",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                }
            }
        }

        self.logger.info("stdin closed, draining in-flight requests", None);
        while let Some(done) = in_flight.join_next().await {
            if let Err(err) = done {
                self.logger.error(
                    "Request task failed",
                    Some(&serde_json::json!({"error": err.to_string()})),
                );
            }
        }
        drop(tx);
        writer_task
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?;
        Ok(())
    }
}

pub async fn run_stdio(app: Arc<App>) -> Result<(), ToolError> {
    let server = Arc::new(McpServer::new(app));
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
}
