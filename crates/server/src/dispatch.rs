use crate::error::ServerError;
use crate::rate_limit::{Decision, RequestMeta};
use crate::state::AppState;
use crate::tools;
use anyhow::Result;
use conexus_protocol::{methods, JsonRpcRequest, JsonRpcResponse, Notification, RequestId, RpcError};
use conexus_store::VectorBackend;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2024-11-05";
const RESOURCE_SCHEME: &str = "conexus://";

/// Routes parsed JSON-RPC requests to method handlers. Transport-agnostic:
/// the stdio loop and the HTTP endpoint both feed it.
pub struct Dispatcher {
    state: Arc<AppState>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle one decoded JSON value. Returns `None` for notifications.
    pub async fn handle_value(&self, raw: Value) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(err) => {
                let id = extract_id(&raw);
                return Some(JsonRpcResponse::error(
                    id,
                    RpcError::invalid_request(err.to_string()),
                ));
            }
        };
        self.handle_request(request).await
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.state
            .metrics
            .requests_total
            .with_label_values(&[request.method.as_str()])
            .inc();

        if !request.has_valid_version() {
            let id = request.id.unwrap_or(RequestId::Null);
            return Some(JsonRpcResponse::error(
                id,
                RpcError::invalid_request(format!("jsonrpc must be \"2.0\", got '{}'", request.jsonrpc)),
            ));
        }

        let Some(id) = request.id else {
            // Client notifications (e.g. notifications/initialized) take no
            // response; unknown ones are ignored rather than failed.
            log::debug!("notification '{}' acknowledged", request.method);
            return None;
        };

        let cancel = self.state.shutdown.child_token();
        let outcome = self.dispatch(&request.method, request.params, &cancel).await;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true },
                    "resources": {}
                },
                "serverInfo": {
                    "name": "conexus",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
            methods::PING => Ok(json!({})),
            methods::SHUTDOWN => {
                log::info!("shutdown requested by client");
                self.state.shutdown.cancel();
                Ok(json!({}))
            }
            methods::TOOLS_LIST => Ok(json!({ "tools": self.state.tools.list() })),
            methods::TOOLS_CALL => {
                #[derive(Deserialize)]
                struct CallParams {
                    name: String,
                    #[serde(default)]
                    arguments: Value,
                }
                let params = params
                    .ok_or_else(|| RpcError::invalid_params("tools/call requires params"))?;
                let call: CallParams = serde_json::from_value(params)
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?;
                let arguments = if call.arguments.is_null() {
                    json!({})
                } else {
                    call.arguments
                };
                let result = tools::call(&self.state, &call.name, arguments, cancel)
                    .await
                    .map_err(|err| err.to_rpc_error())?;
                let text = serde_json::to_string(&result)
                    .map_err(|err| ServerError::Internal(err.to_string()).to_rpc_error())?;
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "structured": result,
                }))
            }
            methods::RESOURCES_LIST => {
                let files = self
                    .state
                    .backend
                    .list_indexed_files()
                    .await
                    .map_err(|err| ServerError::from(err).to_rpc_error())?;
                let resources: Vec<Value> = files
                    .iter()
                    .map(|path| {
                        json!({
                            "uri": format!("{RESOURCE_SCHEME}{path}"),
                            "name": path,
                            "mimeType": "text/plain",
                        })
                    })
                    .collect();
                Ok(json!({ "resources": resources }))
            }
            methods::RESOURCES_READ => {
                #[derive(Deserialize)]
                struct ReadParams {
                    uri: String,
                }
                let params = params
                    .ok_or_else(|| RpcError::invalid_params("resources/read requires params"))?;
                let read: ReadParams = serde_json::from_value(params)
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?;
                let path = read
                    .uri
                    .strip_prefix(RESOURCE_SCHEME)
                    .ok_or_else(|| {
                        RpcError::invalid_params(format!("unsupported resource URI: {}", read.uri))
                    })?;
                let chunks = self
                    .state
                    .backend
                    .file_chunks(path)
                    .await
                    .map_err(|err| ServerError::from(err).to_rpc_error())?;
                if chunks.is_empty() {
                    return Err(RpcError::invalid_params(format!(
                        "resource not indexed: {path}"
                    )));
                }
                let text: Vec<String> =
                    chunks.into_iter().map(|chunk| chunk.content).collect();
                Ok(json!({
                    "contents": [{ "uri": read.uri, "text": text.join("\n") }]
                }))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

fn extract_id(raw: &Value) -> RequestId {
    raw.get("id")
        .and_then(|value| serde_json::from_value::<RequestId>(value.clone()).ok())
        .unwrap_or(RequestId::Null)
}

/// Serve line-framed JSON-RPC on a byte stream (stdio in production,
/// duplex pipes in tests).
///
/// Responses are written in admission order by a single writer task; a
/// decode failure emits exactly one null-ID parse error and terminates
/// the read loop without re-decoding the buffer.
pub async fn run_stdio<R, W>(state: Arc<AppState>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&state)));
    let mut lines = BufReader::new(reader).lines();

    // Admission-ordered response queue: handlers may finish out of order,
    // the writer drains strictly FIFO.
    let (queue_tx, mut queue_rx) = mpsc::channel::<oneshot::Receiver<Option<String>>>(256);
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(pending) = queue_rx.recv().await {
            let Ok(Some(line)) = pending.await else {
                continue;
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut list_changed = state.tools.subscribe_changes();

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            changed = list_changed.recv() => {
                if changed.is_ok() {
                    let note = Notification::new(methods::NOTIFY_TOOLS_LIST_CHANGED);
                    enqueue_ready(&queue_tx, serde_json::to_string(&note).ok()).await;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break; // EOF
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let raw: Value = match serde_json::from_str(trimmed) {
                    Ok(raw) => raw,
                    Err(err) => {
                        log::error!("stdio parse error, closing stream: {err}");
                        let response = serde_json::to_string(&JsonRpcResponse::parse_failure()).ok();
                        enqueue_ready(&queue_tx, response).await;
                        break;
                    }
                };

                let meta = RequestMeta {
                    path: "stdio",
                    ..RequestMeta::default()
                };
                if let Decision::Denied { retry_after_secs, .. } = state.limiter.check(&meta) {
                    state.metrics.rate_limited_total.inc();
                    let response = JsonRpcResponse::error(
                        extract_id(&raw),
                        ServerError::RateLimited { retry_after_secs }.to_rpc_error(),
                    );
                    enqueue_ready(&queue_tx, serde_json::to_string(&response).ok()).await;
                    continue;
                }

                let (tx, rx) = oneshot::channel();
                if queue_tx.send(rx).await.is_err() {
                    break;
                }
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let response = dispatcher.handle_value(raw).await;
                    let line = response.and_then(|r| serde_json::to_string(&r).ok());
                    let _ = tx.send(line);
                });
            }
        }
    }

    drop(queue_tx);
    let _ = writer_task.await;
    Ok(())
}

async fn enqueue_ready(
    queue: &mpsc::Sender<oneshot::Receiver<Option<String>>>,
    line: Option<String>,
) {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(line);
    let _ = queue.send(rx).await;
}
