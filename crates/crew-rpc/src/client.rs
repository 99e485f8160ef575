//! Persistent JSON-RPC client.
//!
//! One [`RpcClient`] owns one framed connection to the backend. A
//! writer task serializes outgoing messages; a reader task routes
//! incoming traffic:
//!
//! - responses complete the matching entry in the pending-request map
//! - `$/progress` notifications are forwarded to the listener
//!   registered for their `workDoneToken`
//! - backend-initiated `conversation/invokeClientTool` requests are
//!   dispatched to the [`ClientToolHandler`] on their own task, so a
//!   slow tool never stalls the read loop
//!
//! When the connection drops, every outstanding request resolves with
//! [`RpcError::ConnectionClosed`] and all progress listeners end.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crew_core::WorkDoneToken;

use crate::codec::JsonRpcCodec;
use crate::errors::RpcError;
use crate::methods;
use crate::params::InvokeClientToolParams;
use crate::progress::{ProgressParams, ProgressValue};
use crate::types::{
    error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};

/// Handles backend-initiated tool invocations.
#[async_trait]
pub trait ClientToolHandler: Send + Sync {
    /// Run the tool and return its JSON result, or an error message
    /// that becomes a JSON-RPC internal error response.
    async fn invoke_tool(&self, params: InvokeClientToolParams) -> Result<Value, String>;
}

/// Rejects every tool invocation. Useful for scoped subagent clients
/// that must not run client tools.
pub struct NullToolHandler;

#[async_trait]
impl ClientToolHandler for NullToolHandler {
    async fn invoke_tool(&self, params: InvokeClientToolParams) -> Result<Value, String> {
        Err(format!("client tool not available: {}", params.name))
    }
}

type PendingMap = DashMap<i64, oneshot::Sender<Result<Value, RpcError>>>;
type ProgressMap = DashMap<String, mpsc::UnboundedSender<ProgressValue>>;

/// A JSON-RPC client over one persistent connection.
pub struct RpcClient {
    next_id: AtomicI64,
    pending: Arc<PendingMap>,
    progress: Arc<ProgressMap>,
    outgoing: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
}

impl RpcClient {
    /// Take ownership of a byte stream and start the reader/writer
    /// tasks. `handler` receives backend-initiated tool invocations.
    pub fn connect<S>(stream: S, handler: Arc<dyn ClientToolHandler>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(stream, JsonRpcCodec::new());
        let (mut sink, mut source) = framed.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let progress: Arc<ProgressMap> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let client = Arc::new(Self {
            next_id: AtomicI64::new(1),
            pending: pending.clone(),
            progress: progress.clone(),
            outgoing: outgoing_tx.clone(),
            shutdown: shutdown.clone(),
        });

        // Writer task: drains the outgoing queue into the sink.
        let writer_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outgoing_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(error) = sink.send(message).await {
                            warn!(%error, "write failed, closing connection");
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                    () = writer_shutdown.cancelled() => break,
                }
            }
        }));

        // Reader task: routes incoming messages until EOF or shutdown.
        let reader_shutdown = shutdown.clone();
        let reader_pending = pending;
        let reader_progress = progress;
        drop(tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = source.next() => message,
                    () = reader_shutdown.cancelled() => break,
                };
                match message {
                    Some(Ok(message)) => {
                        Self::route(
                            message,
                            &reader_pending,
                            &reader_progress,
                            &outgoing_tx,
                            &handler,
                        );
                    }
                    Some(Err(error)) => {
                        warn!(%error, "read failed, closing connection");
                        break;
                    }
                    None => {
                        debug!("backend closed the connection");
                        break;
                    }
                }
            }
            reader_shutdown.cancel();
            // Fail everything still in flight and end progress streams.
            // Dropping a pending sender resolves its request with
            // `ConnectionClosed` on the await side.
            reader_pending.retain(|_, _| false);
            reader_progress.clear();
        }));

        client
    }

    fn route(
        message: Message,
        pending: &Arc<PendingMap>,
        progress: &Arc<ProgressMap>,
        outgoing: &mpsc::UnboundedSender<Message>,
        handler: &Arc<dyn ClientToolHandler>,
    ) {
        match message {
            Message::Response(response) => Self::route_response(response, pending),
            Message::Notification(notification) => {
                Self::route_notification(notification, progress);
            }
            Message::Request(request) => {
                Self::route_request(request, outgoing.clone(), handler.clone());
            }
        }
    }

    fn route_response(response: JsonRpcResponse, pending: &Arc<PendingMap>) {
        let RequestId::Number(id) = response.id else {
            warn!(id = %response.id, "response with non-numeric id, dropping");
            return;
        };
        let Some((_, tx)) = pending.remove(&id) else {
            trace!(id, "response for unknown request, dropping");
            return;
        };
        let result = match response.error {
            Some(error) => Err(RpcError::Backend {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    fn route_notification(notification: JsonRpcNotification, progress: &Arc<ProgressMap>) {
        if notification.method != methods::PROGRESS {
            trace!(method = notification.method, "unhandled notification");
            return;
        }
        let params: ProgressParams = match notification
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                warn!("malformed $/progress params, dropping");
                return;
            }
        };
        let token = params.token.as_str().to_owned();
        let is_end = matches!(params.value, ProgressValue::End { .. });
        if let Some(listener) = progress.get(&token) {
            let _ = listener.send(params.value);
        } else {
            trace!(token, "progress for unregistered token, dropping");
        }
        // A turn's stream is complete after `end`; drop the listener so
        // the map never grows unbounded.
        if is_end {
            let _ = progress.remove(&token);
        }
    }

    fn route_request(
        request: JsonRpcRequest,
        outgoing: mpsc::UnboundedSender<Message>,
        handler: Arc<dyn ClientToolHandler>,
    ) {
        if request.method != methods::CONVERSATION_INVOKE_CLIENT_TOOL {
            let response = JsonRpcResponse::error(
                request.id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method: {}", request.method),
            );
            let _ = outgoing.send(Message::Response(response));
            return;
        }
        let params: InvokeClientToolParams = match request
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                let response = JsonRpcResponse::error(
                    request.id,
                    error_codes::INVALID_PARAMS,
                    "malformed invokeClientTool params",
                );
                let _ = outgoing.send(Message::Response(response));
                return;
            }
        };
        // Tool execution runs on its own task so the read loop keeps
        // draining progress notifications meanwhile.
        drop(tokio::spawn(async move {
            let response = match handler.invoke_tool(params).await {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(message) => {
                    JsonRpcResponse::error(request.id, error_codes::INTERNAL_ERROR, message)
                }
            };
            let _ = outgoing.send(Message::Response(response));
        }));
    }

    /// Send a request and await its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, Some(params));
        if self.outgoing.send(Message::Request(request)).is_err() {
            let _ = self.pending.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }

    /// Send a fire-and-forget notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let notification = JsonRpcNotification::new(method, Some(params));
        self.outgoing
            .send(Message::Notification(notification))
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Register a progress listener for a turn token.
    ///
    /// The returned receiver yields every progress value for that token
    /// and ends after the `end` value (or when the connection drops).
    #[must_use]
    pub fn open_progress(&self, token: &WorkDoneToken) -> mpsc::UnboundedReceiver<ProgressValue> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.progress.insert(token.as_str().to_owned(), tx);
        rx
    }

    /// Drop the listener for a token (used when a turn fails before its
    /// `end` event arrives).
    pub fn close_progress(&self, token: &WorkDoneToken) {
        let _ = self.progress.remove(token.as_str());
    }

    /// Ask the backend to cancel the turn correlated with `token`.
    pub fn cancel_turn(&self, token: &WorkDoneToken) -> Result<(), RpcError> {
        self.notify(
            methods::WORK_DONE_PROGRESS_CANCEL,
            serde_json::json!({ "token": token }),
        )
    }

    /// Close the connection. Outstanding requests resolve with
    /// [`RpcError::ConnectionClosed`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether the connection has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending.len())
            .field("progress_listeners", &self.progress.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressPayload;
    use assert_matches::assert_matches;
    use serde_json::json;

    /// Framed handle to the fake backend side of a duplex pipe.
    type Peer = Framed<tokio::io::DuplexStream, JsonRpcCodec>;

    fn connect_pair(handler: Arc<dyn ClientToolHandler>) -> (Arc<RpcClient>, Peer) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let client = RpcClient::connect(client_side, handler);
        (client, Framed::new(server_side, JsonRpcCodec::new()))
    }

    async fn expect_request(peer: &mut Peer) -> JsonRpcRequest {
        match peer.next().await.unwrap().unwrap() {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_resolves_with_result() {
        let (client, mut peer) = connect_pair(Arc::new(NullToolHandler));

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.request("conversation/create", json!({"owner": "lead"})).await }
        });

        let request = expect_request(&mut peer).await;
        assert_eq!(request.method, "conversation/create");
        peer.send(Message::Response(JsonRpcResponse::success(
            request.id,
            json!({"conversationId": "conv-1"}),
        )))
        .await
        .unwrap();

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["conversationId"], "conv-1");
    }

    #[tokio::test]
    async fn backend_error_surfaces_as_rpc_error() {
        let (client, mut peer) = connect_pair(Arc::new(NullToolHandler));

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.request("conversation/turn", json!({})).await }
        });

        let request = expect_request(&mut peer).await;
        peer.send(Message::Response(JsonRpcResponse::error(
            request.id,
            error_codes::INVALID_PARAMS,
            "missing prompt",
        )))
        .await
        .unwrap();

        let error = call.await.unwrap().unwrap_err();
        assert_matches!(error, RpcError::Backend { code: -32602, .. });
    }

    #[tokio::test]
    async fn progress_routes_by_token_and_ends_on_end() {
        let (client, mut peer) = connect_pair(Arc::new(NullToolHandler));
        let token = WorkDoneToken::from("wdt-1");
        let mut rx = client.open_progress(&token);

        for value in [
            json!({"kind": "begin"}),
            json!({"kind": "report", "payload": {"event": "delta", "text": "hi"}}),
            json!({"kind": "end"}),
        ] {
            peer.send(Message::Notification(JsonRpcNotification::new(
                methods::PROGRESS,
                Some(json!({"token": "wdt-1", "value": value})),
            )))
            .await
            .unwrap();
        }

        assert_matches!(rx.recv().await, Some(ProgressValue::Begin { .. }));
        assert_matches!(
            rx.recv().await,
            Some(ProgressValue::Report { payload: ProgressPayload::Delta { text } }) if text == "hi"
        );
        assert_matches!(rx.recv().await, Some(ProgressValue::End { .. }));
        // Listener was dropped after end: channel is now closed.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn progress_for_other_tokens_not_delivered() {
        let (client, mut peer) = connect_pair(Arc::new(NullToolHandler));
        let token = WorkDoneToken::from("wdt-mine");
        let mut rx = client.open_progress(&token);

        peer.send(Message::Notification(JsonRpcNotification::new(
            methods::PROGRESS,
            Some(json!({"token": "wdt-other", "value": {"kind": "begin"}})),
        )))
        .await
        .unwrap();
        peer.send(Message::Notification(JsonRpcNotification::new(
            methods::PROGRESS,
            Some(json!({"token": "wdt-mine", "value": {"kind": "end"}})),
        )))
        .await
        .unwrap();

        // Only the end for our token arrives.
        assert_matches!(rx.recv().await, Some(ProgressValue::End { .. }));
    }

    #[tokio::test]
    async fn server_tool_invocation_dispatches_to_handler() {
        struct EchoHandler;
        #[async_trait]
        impl ClientToolHandler for EchoHandler {
            async fn invoke_tool(&self, params: InvokeClientToolParams) -> Result<Value, String> {
                Ok(json!({"echo": params.name}))
            }
        }

        let (_client, mut peer) = connect_pair(Arc::new(EchoHandler));

        peer.send(Message::Request(JsonRpcRequest::new(
            RequestId::String("srv-1".into()),
            methods::CONVERSATION_INVOKE_CLIENT_TOOL,
            Some(json!({
                "conversationId": "conv-1",
                "toolCallId": "tc-1",
                "name": "delegate_task",
                "arguments": {}
            })),
        )))
        .await
        .unwrap();

        match peer.next().await.unwrap().unwrap() {
            Message::Response(response) => {
                assert_eq!(response.id, RequestId::String("srv-1".into()));
                assert_eq!(response.result.unwrap()["echo"], "delegate_task");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_server_method_gets_method_not_found() {
        let (_client, mut peer) = connect_pair(Arc::new(NullToolHandler));

        peer.send(Message::Request(JsonRpcRequest::new(
            5,
            "window/showMessage",
            None,
        )))
        .await
        .unwrap();

        match peer.next().await.unwrap().unwrap() {
            Message::Response(response) => {
                assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_disconnect_fails_pending_requests() {
        let (client, mut peer) = connect_pair(Arc::new(NullToolHandler));

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.request("conversation/turn", json!({})).await }
        });

        // Consume the request, then hang up without answering.
        let _ = expect_request(&mut peer).await;
        drop(peer);

        let error = call.await.unwrap().unwrap_err();
        assert_matches!(error, RpcError::ConnectionClosed);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn request_after_close_is_rejected() {
        let (client, _peer) = connect_pair(Arc::new(NullToolHandler));
        client.close();
        let error = client.request("conversation/create", json!({})).await.unwrap_err();
        assert_matches!(error, RpcError::ConnectionClosed);
    }
}
