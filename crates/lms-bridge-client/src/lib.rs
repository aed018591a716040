//! LMS Bridge Client Library
//!
//! Calls methods exposed by an RPC server running in another frame. Requests
//! are posted to the target frame and replies are picked up by a listener on
//! the local window, matched by origin and request id.

pub mod ids;

pub use ids::{IdGenerator, RandomHexIds, SequentialIds};

use lms_bridge_core::frame::{serialized_origin, MessageListener};
use lms_bridge_core::models::DEFAULT_CALL_TIMEOUT_MS;
use lms_bridge_core::{
    FrameRef, JsonRpcError, ListenerId, Message, MessageEvent, Notification, Request, RequestId,
    Response, TransportError,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Method name cannot be empty")]
    EmptyMethod,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request to {origin} timed out")]
    Timeout { origin: String },

    #[error("RPC reply had no result or error")]
    NoResultOrError,

    #[error("RPC error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub id: Option<RequestId>,
}

impl CallOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Removes the reply listener however the call ends
struct ListenerGuard {
    window: FrameRef,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.window.remove_message_listener(self.id);
    }
}

/// RPC client bound to the local window that receives replies
pub struct Client {
    window: FrameRef,
    timeout: Duration,
    ids: Arc<dyn IdGenerator>,
}

impl Client {
    pub fn new(window: FrameRef) -> Self {
        Self {
            window,
            timeout: DEFAULT_TIMEOUT,
            ids: ids::default_generator(),
        }
    }

    /// Default timeout for calls that do not set one
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Call `method` on the server in `frame` and wait for its result.
    pub async fn call(
        &self,
        frame: &FrameRef,
        origin: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        self.call_with(frame, origin, method, params, CallOptions::default())
            .await
    }

    /// Like [`Client::call`] with an explicit timeout and/or request id.
    ///
    /// Caller-supplied ids must be unique among this window's in-flight calls.
    pub async fn call_with(
        &self,
        frame: &FrameRef,
        origin: &str,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        if method.is_empty() {
            return Err(RpcError::EmptyMethod);
        }

        let id = options.id.unwrap_or_else(|| self.ids.next_id());
        let timeout = options.timeout.unwrap_or(self.timeout);
        let message = serde_json::to_value(Request::new(method, params, id.clone()))?;

        let (tx, rx) = oneshot::channel();
        let listener_id = self
            .window
            .add_message_listener(reply_listener(origin, id.clone(), tx));
        let _guard = ListenerGuard {
            window: self.window.clone(),
            id: listener_id,
        };

        frame.post_message(message, origin, self.window.clone())?;
        tracing::debug!("Sent {} request {} to {}", method, id, origin);

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(TransportError::Closed(self.window.origin().to_string()).into());
            }
            Err(_) => {
                tracing::debug!("Request {} to {} timed out", id, origin);
                return Err(RpcError::Timeout {
                    origin: origin.to_string(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(RpcError::Remote(error));
        }
        response.result.ok_or(RpcError::NoResultOrError)
    }

    /// Send a notification. No reply is expected or awaited.
    pub fn notify(
        &self,
        frame: &FrameRef,
        origin: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<()> {
        if method.is_empty() {
            return Err(RpcError::EmptyMethod);
        }

        let message = serde_json::to_value(Notification::new(method, params))?;
        frame.post_message(message, origin, self.window.clone())?;
        tracing::debug!("Sent {} notification to {}", method, origin);
        Ok(())
    }
}

/// One-off call with the default timeout and id generator.
pub async fn call(
    window: &FrameRef,
    frame: &FrameRef,
    origin: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<Value> {
    Client::new(window.clone())
        .call(frame, origin, method, params)
        .await
}

/// One-off notification.
pub fn notify(
    window: &FrameRef,
    frame: &FrameRef,
    origin: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<()> {
    Client::new(window.clone()).notify(frame, origin, method, params)
}

fn reply_listener(
    origin: &str,
    id: RequestId,
    tx: oneshot::Sender<Response>,
) -> MessageListener {
    let expected_origin = serialized_origin(origin).unwrap_or_else(|_| origin.to_string());
    let tx = Mutex::new(Some(tx));

    Arc::new(move |event: &MessageEvent| {
        if event.origin != expected_origin {
            return;
        }
        let Some(response) = correlate(&event.data, &id) else {
            return;
        };
        if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(response);
        }
    })
}

/// Match a payload against the id of an outgoing request.
///
/// Any JSON-RPC message carrying our id counts as the reply, even one with
/// neither `result` nor `error`; that case surfaces as
/// [`RpcError::NoResultOrError`].
fn correlate(data: &Value, id: &RequestId) -> Option<Response> {
    match Message::classify(data) {
        Message::Response(response) if response.id == *id => Some(response),
        Message::Request { id: raw, .. } if RequestId::from_value(&raw).as_ref() == Some(id) => {
            Some(Response {
                jsonrpc: lms_bridge_core::protocol::JSONRPC_VERSION.to_string(),
                result: None,
                error: None,
                id: id.clone(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_bridge_core::{Frame, InMemoryWindow};
    use serde_json::json;
    use tokio::sync::mpsc;

    const LMS: &str = "https://lms.example.com";
    const SIDEBAR: &str = "https://hypothes.is";

    fn windows() -> (Arc<InMemoryWindow>, Arc<InMemoryWindow>) {
        (InMemoryWindow::new(LMS), InMemoryWindow::new(SIDEBAR))
    }

    /// Answer every message posted to `remote` with whatever `reply` returns
    fn respond_with<F>(remote: &Arc<InMemoryWindow>, reply: F)
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let remote_ref: FrameRef = remote.clone();
        let weak = Arc::downgrade(&remote_ref);
        remote.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let Some(me) = weak.upgrade() else { return };
            for message in reply(&event.data) {
                let _ = event.source.post_message(message, &event.origin, me.clone());
            }
        }));
    }

    fn capture(remote: &Arc<InMemoryWindow>) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        remote.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.data.clone());
        }));
        rx
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (local, remote) = windows();
        respond_with(&remote, |data| {
            let a = data["params"][0].as_i64().unwrap();
            let b = data["params"][1].as_i64().unwrap();
            vec![json!({"jsonrpc": "2.0", "result": a + b, "id": data["id"]})]
        });

        let client = Client::new(local.clone());
        let frame: FrameRef = remote.clone();
        let result = client
            .call_with(
                &frame,
                SIDEBAR,
                "add",
                vec![json!(2), json!(3)],
                CallOptions::default()
                    .timeout(Duration::from_millis(500))
                    .id("id1"),
            )
            .await
            .unwrap();

        assert_eq!(result, json!(5));
        assert_eq!(local.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_request_envelope() {
        let (local, remote) = windows();
        let mut sent = capture(&remote);

        let client = Client::new(local.clone())
            .with_id_generator(Arc::new(SequentialIds::starting_at(10)))
            .with_timeout(Duration::from_millis(20));
        let frame: FrameRef = remote.clone();
        let _ = client.call(&frame, SIDEBAR, "requestConfig", vec![]).await;

        let request = sent.recv().await.unwrap();
        assert_eq!(
            request,
            json!({"jsonrpc": "2.0", "method": "requestConfig", "params": [], "id": 10})
        );
    }

    #[tokio::test]
    async fn test_null_result_is_a_result() {
        let (local, remote) = windows();
        respond_with(&remote, |data| {
            vec![json!({"jsonrpc": "2.0", "result": null, "id": data["id"]})]
        });

        let frame: FrameRef = remote.clone();
        let result = Client::new(local.clone())
            .call(&frame, SIDEBAR, "nothing", vec![])
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (local, remote) = windows();

        let frame: FrameRef = remote.clone();
        let err = Client::new(local.clone())
            .with_timeout(Duration::from_millis(30))
            .call(&frame, SIDEBAR, "add", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout { .. }));
        let message = err.to_string();
        assert!(message.contains(SIDEBAR));
        assert!(message.contains("timed out"));
        assert_eq!(local.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_ignores_unrelated_replies() {
        let (local, remote) = windows();
        respond_with(&remote, |_| {
            vec![
                json!({"jsonrpc": "2.0", "result": "wrong id", "id": "other"}),
                json!({"result": "no marker", "id": "id1"}),
                json!("not an object"),
                json!({"jsonrpc": "1.0", "result": "old", "id": "id1"}),
            ]
        });

        let frame: FrameRef = remote.clone();
        let err = Client::new(local.clone())
            .call_with(
                &frame,
                SIDEBAR,
                "add",
                vec![],
                CallOptions::default()
                    .timeout(Duration::from_millis(50))
                    .id("id1"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_ignores_replies_from_other_origins() {
        let (local, remote) = windows();
        let imposter = InMemoryWindow::new("https://evil.example.com");

        // The imposter answers in place of the real target
        let imposter_ref: FrameRef = imposter.clone();
        let local_ref: FrameRef = local.clone();
        let mut sent = capture(&remote);
        let frame: FrameRef = remote.clone();
        let client = Client::new(local.clone()).with_timeout(Duration::from_millis(100));
        let call = tokio::spawn(async move { client.call(&frame, SIDEBAR, "add", vec![]).await });

        let request = sent.recv().await.unwrap();
        local_ref
            .post_message(
                json!({"jsonrpc": "2.0", "result": 1, "id": request["id"]}),
                LMS,
                imposter_ref,
            )
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_error_reply_rejects() {
        let (local, remote) = windows();
        respond_with(&remote, |data| {
            vec![json!({
                "jsonrpc": "2.0",
                "error": {"code": -32600, "message": "method name not recognized"},
                "id": data["id"]
            })]
        });

        let frame: FrameRef = remote.clone();
        let err = Client::new(local.clone())
            .call(&frame, SIDEBAR, "missing", vec![])
            .await
            .unwrap_err();

        match err {
            RpcError::Remote(error) => {
                assert_eq!(error.code, -32600);
                assert_eq!(error.message, "method name not recognized");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_without_result_or_error() {
        let (local, remote) = windows();
        respond_with(&remote, |data| {
            vec![json!({"jsonrpc": "2.0", "id": data["id"]})]
        });

        let frame: FrameRef = remote.clone();
        let err = Client::new(local.clone())
            .call(&frame, SIDEBAR, "add", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::NoResultOrError));
        assert_eq!(err.to_string(), "RPC reply had no result or error");
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_cross_resolve() {
        let (local, remote) = windows();
        let mut sent = capture(&remote);

        let client = Arc::new(Client::new(local.clone()));
        let frame: FrameRef = remote.clone();

        let first = {
            let (client, frame) = (client.clone(), frame.clone());
            tokio::spawn(async move { client.call(&frame, SIDEBAR, "first", vec![]).await })
        };
        let second = {
            let (client, frame) = (client.clone(), frame.clone());
            tokio::spawn(async move { client.call(&frame, SIDEBAR, "second", vec![]).await })
        };

        let mut requests = vec![sent.recv().await.unwrap(), sent.recv().await.unwrap()];
        assert_ne!(requests[0]["id"], requests[1]["id"]);

        // Answer in reverse order of arrival
        requests.reverse();
        let remote_ref: FrameRef = remote.clone();
        for request in requests {
            local
                .post_message(
                    json!({"jsonrpc": "2.0", "result": request["method"], "id": request["id"]}),
                    LMS,
                    remote_ref.clone(),
                )
                .unwrap();
        }

        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
        assert_eq!(local.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_removes_listener() {
        let (local, remote) = windows();
        remote.close();

        let frame: FrameRef = remote.clone();
        let err = Client::new(local.clone())
            .call(&frame, SIDEBAR, "add", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Transport(TransportError::Closed(_))));
        assert_eq!(local.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_method_is_rejected() {
        let (local, remote) = windows();
        let frame: FrameRef = remote.clone();
        let client = Client::new(local.clone());

        assert!(matches!(
            client.call(&frame, SIDEBAR, "", vec![]).await,
            Err(RpcError::EmptyMethod)
        ));
        assert!(matches!(
            client.notify(&frame, SIDEBAR, "", vec![]),
            Err(RpcError::EmptyMethod)
        ));
    }

    #[tokio::test]
    async fn test_notify_sends_envelope_without_id() {
        let (local, remote) = windows();
        let mut sent = capture(&remote);

        let local_ref: FrameRef = local.clone();
        let frame: FrameRef = remote.clone();
        notify(&local_ref, &frame, SIDEBAR, "ping", vec![]).unwrap();

        let message = sent.recv().await.unwrap();
        assert_eq!(
            message,
            json!({"jsonrpc": "2.0", "method": "ping", "params": []})
        );
        assert_eq!(local.listener_count(), 0);
    }
}
