//! JSON-RPC tool server over stdio.
//!
//! One long-lived client drives the server through line-delimited JSON-RPC:
//! `initialize` negotiates the protocol version, `tools/list` enumerates the
//! tool table, `tools/call` dispatches into the façade. Background tasks run
//! the aging sweep and stale-transaction repair on their configured
//! intervals.

mod dispatch;
mod handlers;
pub mod protocol;
mod rate_limit;
mod tools;

pub use dispatch::RpcMethod;
pub use handlers::ToolFacade;
pub use rate_limit::{RateLimiter, ToolClass};
pub use tools::{ToolName, definitions};

use crate::config::ServerConfig;
use crate::context::ContextRegistry;
use crate::{Error, Result};
use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Interval between stale-transaction repair passes.
const REPAIR_INTERVAL: Duration = Duration::from_secs(60);

/// The stdio JSON-RPC server.
pub struct McpServer {
    facade: Arc<ToolFacade>,
    registry: Arc<ContextRegistry>,
    sweep_interval: Duration,
}

impl McpServer {
    /// Builds the server over an opened registry.
    #[must_use]
    pub fn new(registry: Arc<ContextRegistry>, config: ServerConfig) -> Self {
        let sweep_interval = Duration::from_secs(config.aging.sweep_interval_secs.max(60));
        let facade = Arc::new(ToolFacade::new(Arc::clone(&registry), config));
        Self {
            facade,
            registry,
            sweep_interval,
        }
    }

    /// The façade (direct-call path for tests and the CLI).
    #[must_use]
    pub const fn facade(&self) -> &Arc<ToolFacade> {
        &self.facade
    }

    /// Runs until stdin closes or Ctrl-C arrives.
    pub async fn run(&self) -> Result<()> {
        self.registry.warm_all(crate::cache::warmer::DEFAULT_WARM_ENTITY_COUNT);
        let background = self.spawn_background_tasks();

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = tokio::io::stdout();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if let Some(response) = self.handle_line(&line).await {
                                let rendered = serde_json::to_string(&response)
                                    .unwrap_or_else(|_| String::from("{}"));
                                async {
                                    stdout.write_all(rendered.as_bytes()).await?;
                                    stdout.write_all(b"\n").await
                                }
                                .await
                                .map_err(|e| Error::OperationFailed {
                                    operation: "write_stdout".to_string(),
                                    cause: e.to_string(),
                                })?;
                                stdout.flush().await.map_err(|e| Error::OperationFailed {
                                    operation: "flush_stdout".to_string(),
                                    cause: e.to_string(),
                                })?;
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "stdin read failed, shutting down");
                            break;
                        },
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                    break;
                },
            }
        }

        for task in background {
            task.abort();
        }
        self.registry.shutdown();
        Ok(())
    }

    fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut tasks = Vec::new();

        let sweep_registry = Arc::clone(&self.registry);
        let sweep_interval = self.sweep_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let registry = Arc::clone(&sweep_registry);
                let _ = tokio::task::spawn_blocking(move || registry.sweep_all()).await;
            }
        }));

        let repair_registry = Arc::clone(&self.registry);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REPAIR_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                repair_registry.repair_all();
            }
        }));

        tasks
    }

    /// Handles one request line. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(protocol::PARSE_ERROR, format!("parse error: {e}")),
                ));
            },
        };

        let id = request.id.clone();
        let method = RpcMethod::from(request.method.as_str());
        let is_notification = id.is_none();
        let response = self.dispatch(&method, request.params).await;

        if is_notification {
            return None;
        }
        let id = id.unwrap_or(Value::Null);
        Some(match response {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    async fn dispatch(
        &self,
        method: &RpcMethod,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        match method {
            RpcMethod::Initialize => handle_initialize(params.as_ref()),
            RpcMethod::Initialized => Ok(Value::Null),
            RpcMethod::ListTools => Ok(definitions()),
            RpcMethod::Ping => Ok(json!({})),
            RpcMethod::CallTool => {
                let params = params.unwrap_or(Value::Null);
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        JsonRpcError::new(protocol::INVALID_PARAMS, "missing tool name")
                    })?;
                let Some(tool) = ToolName::parse(name) else {
                    return Err(JsonRpcError::new(
                        protocol::METHOD_NOT_FOUND,
                        format!("unknown tool '{name}'"),
                    ));
                };
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                self.facade
                    .call(tool, arguments)
                    .await
                    .map_err(|e| protocol::to_rpc_error(&e))
            },
            RpcMethod::Unknown(name) => Err(JsonRpcError::new(
                protocol::METHOD_NOT_FOUND,
                format!("unknown method '{name}'"),
            )),
        }
    }
}

fn handle_initialize(params: Option<&Value>) -> std::result::Result<Value, JsonRpcError> {
    if let Some(requested) = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        && requested != protocol::PROTOCOL_VERSION
    {
        return Err(JsonRpcError::new(
            protocol::INVALID_PARAMS,
            format!(
                "Protocol version mismatch: client requested {requested}, server speaks {}",
                protocol::PROTOCOL_VERSION
            ),
        ));
    }
    Ok(json!({
        "protocolVersion": protocol::PROTOCOL_VERSION,
        "serverInfo": {
            "name": "engram",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": { "tools": {} },
    }))
}
