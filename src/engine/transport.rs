//! Engine RPC Transport
//!
//! Speaks line-delimited JSON-RPC 2.0 to the SPDK target over its Unix
//! socket. Every call opens its own connection, sends exactly one request,
//! waits for the response carrying the same id and closes the connection.

use crate::config::RpcConfig;
use crate::domain::ports::RpcChannel;
use crate::error::{Error, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info, trace, warn};

/// Window for `check_connection`
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size for response accumulation
const READ_CHUNK: usize = 8 * 1024;

// =============================================================================
// Wire Types
// =============================================================================

/// A single JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request; null params and empty objects are omitted from the wire
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        let params = params.filter(|p| match p {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        });

        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// A single JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Convert into the call outcome
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::Engine {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// =============================================================================
// Call Lifecycle
// =============================================================================

/// Per-call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Sent,
    AwaitingResponse,
    Completed,
    TimedOut,
    ProtocolError,
    ConnectionError,
    Closed,
}

impl CallState {
    /// Terminal outcome states; exactly one is reached before `Closed`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed
                | CallState::TimedOut
                | CallState::ProtocolError
                | CallState::ConnectionError
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Sent => "sent",
            CallState::AwaitingResponse => "awaiting_response",
            CallState::Completed => "completed",
            CallState::TimedOut => "timed_out",
            CallState::ProtocolError => "protocol_error",
            CallState::ConnectionError => "connection_error",
            CallState::Closed => "closed",
        }
    }
}

/// Tracks the state of one in-flight call
#[derive(Debug)]
struct CallTrace<'a> {
    method: &'a str,
    id: u64,
    state: CallState,
    history: Vec<CallState>,
}

impl<'a> CallTrace<'a> {
    fn new(method: &'a str, id: u64) -> Self {
        Self {
            method,
            id,
            state: CallState::Idle,
            history: vec![CallState::Idle],
        }
    }

    fn advance(&mut self, next: CallState) {
        trace!(
            method = self.method,
            id = self.id,
            "rpc call {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
        self.history.push(next);
    }

    /// Record the terminal state matching `outcome` and close
    fn finish(&mut self, outcome: &Result<Value>) {
        let terminal = match outcome {
            Ok(_) | Err(Error::Engine { .. }) => CallState::Completed,
            Err(Error::Timeout { .. }) => CallState::TimedOut,
            Err(Error::UnexpectedResponse { .. })
            | Err(Error::Protocol { .. })
            | Err(Error::JsonParse(_)) => CallState::ProtocolError,
            Err(_) => CallState::ConnectionError,
        };
        self.advance(terminal);
        self.advance(CallState::Closed);
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Unix-socket JSON-RPC client: one connection per call, no pooling, no retries
pub struct RpcTransport {
    socket_path: PathBuf,
    default_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcTransport {
    /// Create a transport from configuration
    pub fn new(config: &RpcConfig) -> Self {
        Self::with_socket(&config.socket_path, config.timeout())
    }

    /// Create a transport for an explicit socket
    pub fn with_socket(socket_path: impl AsRef<Path>, default_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            default_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issue one RPC call
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_override: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout_override.unwrap_or(self.default_timeout);
        let request = RpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let mut trace = CallTrace::new(method, request.id);
        let started = Instant::now();

        let outcome = match self.ensure_socket().await {
            Err(e) => Err(e),
            Ok(()) => {
                info!("Sending RPC request: {}", method);
                debug!(id = request.id, params = ?request.params, "rpc request");

                match tokio::time::timeout(timeout, self.exchange(&request, &mut trace)).await {
                    Ok(result) => result,
                    Err(_) => {
                        // The exchange future owned the stream; dropping it closed the socket.
                        warn!("RPC request timeout for method: {} ({}ms)", method, timeout.as_millis());
                        Err(Error::Timeout {
                            method: method.to_string(),
                            timeout,
                        })
                    }
                }
            }
        };

        trace.finish(&outcome);
        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.class().as_str(),
        };
        metrics::record_rpc(method, label, started.elapsed().as_secs_f64());

        outcome
    }

    /// Verify the socket exists and accepts a connection
    pub async fn check_connection(&self) -> Result<()> {
        self.ensure_socket().await?;

        match tokio::time::timeout(PROBE_TIMEOUT, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(mut stream)) => {
                let _ = stream.shutdown().await;
                Ok(())
            }
            Ok(Err(e)) => Err(self.unavailable(format!("Cannot connect to SPDK: {}", e))),
            Err(_) => Err(self.unavailable("Connection timeout".to_string())),
        }
    }

    async fn ensure_socket(&self) -> Result<()> {
        match tokio::fs::metadata(&self.socket_path).await {
            Ok(_) => Ok(()),
            Err(_) => Err(self.unavailable("SPDK socket not found".to_string())),
        }
    }

    fn unavailable(&self, reason: String) -> Error {
        Error::TransportUnavailable {
            socket: self.socket_path.display().to_string(),
            reason,
        }
    }

    fn io_error(&self, method: &str, err: std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::PermissionDenied => {
                self.unavailable(err.to_string())
            }
            _ => Error::Connection {
                method: method.to_string(),
                source: err,
            },
        }
    }

    /// Connect, send, and await the id-matched response
    async fn exchange(&self, request: &RpcRequest, trace: &mut CallTrace<'_>) -> Result<Value> {
        let method = request.method.as_str();

        trace.advance(CallState::Connecting);
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.io_error(method, e))?;

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        stream
            .write_all(&payload)
            .await
            .map_err(|e| self.io_error(method, e))?;
        trace.advance(CallState::Sent);

        trace.advance(CallState::AwaitingResponse);
        let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];

        let response = loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| self.io_error(method, e))?;

            if n == 0 {
                return Err(Error::Protocol {
                    method: method.to_string(),
                    reason: "connection closed before a response was received".into(),
                });
            }

            buffer.extend_from_slice(&chunk[..n]);
            if let Some(response) = scan_response(&buffer, request.id, method)? {
                break response;
            }
        };

        let _ = stream.shutdown().await;
        response.into_result()
    }
}

#[async_trait]
impl RpcChannel for RpcTransport {
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        RpcTransport::call(self, method, params, timeout).await
    }

    async fn check_connection(&self) -> Result<()> {
        RpcTransport::check_connection(self).await
    }

    fn endpoint(&self) -> String {
        self.socket_path.display().to_string()
    }
}

/// Look for the first complete JSON document in `buffer`.
///
/// `Ok(None)` means more bytes are needed. The first complete document must
/// be an object carrying the expected id.
fn scan_response(buffer: &[u8], expected_id: u64, method: &str) -> Result<Option<RpcResponse>> {
    let mut documents = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();

    match documents.next() {
        None => Ok(None),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(Error::Protocol {
            method: method.to_string(),
            reason: format!("malformed response: {}", e),
        }),
        Some(Ok(value)) => {
            if !value.is_object() {
                return Err(Error::Protocol {
                    method: method.to_string(),
                    reason: format!("response is not an object: {}", value),
                });
            }

            let id = value.get("id").cloned().unwrap_or(Value::Null);
            if id.as_u64() != Some(expected_id) {
                return Err(Error::UnexpectedResponse {
                    method: method.to_string(),
                    expected: expected_id,
                    received: id.to_string(),
                });
            }

            let response: RpcResponse = serde_json::from_value(value)?;
            Ok(Some(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixListener;
    use tokio::sync::oneshot;

    /// Accept one connection, read the request line and answer with `reply`.
    fn serve_once<F>(listener: UnixListener, reply: F) -> tokio::task::JoinHandle<Value>
    where
        F: FnOnce(&Value) -> Vec<u8> + Send + 'static,
    {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let bytes = reply(&request);
            reader.get_mut().write_all(&bytes).await.unwrap();
            request
        })
    }

    fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("spdk.sock")
    }

    #[test]
    fn test_request_omits_empty_params() {
        let req = RpcRequest::new(1, "spdk_get_version", None);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "spdk_get_version"})
        );

        let req = RpcRequest::new(2, "bdev_get_bdevs", Some(json!({})));
        assert!(serde_json::to_value(&req).unwrap().get("params").is_none());

        let req = RpcRequest::new(3, "bdev_raid_get_bdevs", Some(json!("all")));
        assert_eq!(serde_json::to_value(&req).unwrap()["params"], json!("all"));

        let req = RpcRequest::new(4, "framework_get_config", Some(json!(["bdev"])));
        assert_eq!(serde_json::to_value(&req).unwrap()["params"], json!(["bdev"]));
    }

    #[test]
    fn test_scan_response_waits_for_complete_document() {
        assert!(scan_response(b"{\"id\": 3, \"res", 3, "m").unwrap().is_none());
        assert!(scan_response(b"", 3, "m").unwrap().is_none());

        let resp = scan_response(b"{\"id\": 3, \"result\": true}\n", 3, "m")
            .unwrap()
            .unwrap();
        assert_eq!(resp.into_result().unwrap(), json!(true));
    }

    #[test]
    fn test_scan_response_rejects_other_id() {
        let err = scan_response(b"{\"id\": 9, \"result\": 1}\n", 3, "m").unwrap_err();
        assert_matches!(err, Error::UnexpectedResponse { expected: 3, .. });

        let err = scan_response(b"not json\n", 3, "m").unwrap_err();
        assert_matches!(err, Error::Protocol { .. });
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_once(listener, |req| {
            format!("{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"version\":\"SPDK v24.01\"}}}}\n", req["id"])
                .into_bytes()
        });

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));
        let result = transport.call("spdk_get_version", None, None).await.unwrap();
        assert_eq!(result["version"], "SPDK v24.01");

        let request = server.await.unwrap();
        assert_eq!(request["method"], "spdk_get_version");
        assert_eq!(request["jsonrpc"], "2.0");
        assert!(request.get("params").is_none());
    }

    #[tokio::test]
    async fn test_engine_error_surfaces_code_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |req| {
            serde_json::to_vec(&json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32602, "message": "Invalid params"}
            }))
            .unwrap()
        });

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));
        let err = transport
            .call("bdev_raid_create", Some(json!({"name": "r0"})), None)
            .await
            .unwrap_err();

        assert_matches!(err, Error::Engine { code: -32602, ref message } if message == "Invalid params");
    }

    #[tokio::test]
    async fn test_id_mismatch_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |_| b"{\"jsonrpc\":\"2.0\",\"id\":999,\"result\":[]}\n".to_vec());

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));
        let err = transport.call("bdev_get_bdevs", None, None).await.unwrap_err();
        assert_matches!(err, Error::UnexpectedResponse { expected: 1, .. });
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RpcTransport::with_socket(socket_in(&dir), Duration::from_secs(1));

        let err = transport.call("spdk_get_version", None, None).await.unwrap_err();
        assert_matches!(err, Error::TransportUnavailable { .. });

        let err = transport.check_connection().await.unwrap_err();
        assert_matches!(err, Error::TransportUnavailable { .. });
    }

    #[tokio::test]
    async fn test_timeout_closes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let (closed_tx, closed_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            // Never answer; read until the client hangs up.
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            let _ = closed_tx.send(());
        });

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(30));
        let started = Instant::now();
        let err = transport
            .call("bdev_lvol_create_lvstore", None, Some(Duration::from_millis(200)))
            .await
            .unwrap_err();

        assert_matches!(err, Error::Timeout { .. });
        assert!(started.elapsed() < Duration::from_millis(200) + Duration::from_secs(1));

        tokio::time::timeout(Duration::from_secs(2), closed_rx)
            .await
            .expect("server should observe the closed socket")
            .unwrap();
    }

    #[tokio::test]
    async fn test_response_split_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let body = format!(
                "{{\n  \"jsonrpc\": \"2.0\",\n  \"id\": {},\n  \"result\": [1, 2, 3]\n}}\n",
                request["id"]
            );
            let (head, tail) = body.split_at(body.len() / 2);
            reader.get_mut().write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            reader.get_mut().write_all(tail.as_bytes()).await.unwrap();
        });

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));
        let result = transport.call("bdev_get_bdevs", None, None).await.unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_close_without_response_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |_| Vec::new());

        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));
        let err = transport.call("nvmf_get_subsystems", None, None).await.unwrap_err();
        assert_matches!(err, Error::Protocol { .. });
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let transport = RpcTransport::with_socket(&path, Duration::from_secs(2));

        for expected in 1..=3u64 {
            let listener = UnixListener::bind(&path).unwrap();
            let server = serve_once(listener, |req| {
                format!("{{\"id\":{},\"result\":null}}\n", req["id"]).into_bytes()
            });
            transport.call("spdk_get_version", None, None).await.unwrap();
            assert_eq!(server.await.unwrap()["id"], json!(expected));
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn test_call_trace_reaches_closed_once() {
        let mut trace = CallTrace::new("spdk_get_version", 1);
        trace.advance(CallState::Connecting);
        trace.finish(&Err(Error::Timeout {
            method: "spdk_get_version".into(),
            timeout: Duration::from_millis(1),
        }));

        let terminals: Vec<_> = trace.history.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminals, vec![&CallState::TimedOut]);
        assert_eq!(trace.state, CallState::Closed);
    }
}
