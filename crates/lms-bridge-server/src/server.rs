//! JSON-RPC server listening for messages posted to the local window

use lms_bridge_core::models::BridgeConfig;
use lms_bridge_core::{
    Call, Frame, FrameRef, JsonRpcError, ListenerId, Message, MessageEvent, RequestId, Response,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::registry::{self, Handler, MethodRegistry};
use crate::sidebar::{SidebarLatch, SidebarWindow};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Config error: {0}")]
    Config(#[from] lms_bridge_core::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Accepts requests and notifications from an allow-list of origins and
/// dispatches them to registered methods.
///
/// Handlers run on the Tokio runtime, so the frame's listeners must be
/// invoked from within one.
pub struct Server {
    window: FrameRef,
    inner: Arc<Inner>,
    listener: Mutex<Option<ListenerId>>,
}

struct Inner {
    // Weak so the window's listener table does not keep itself alive
    window: Weak<dyn Frame>,
    allowed_origins: Vec<String>,
    methods: MethodRegistry,
    sidebar: SidebarLatch,
    active: AtomicBool,
}

impl Server {
    pub fn new<I, S>(window: FrameRef, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = Arc::new(Inner {
            window: Arc::downgrade(&window),
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
            methods: MethodRegistry::new(),
            sidebar: SidebarLatch::new(),
            active: AtomicBool::new(true),
        });

        let dispatcher = inner.clone();
        let listener = window.add_message_listener(Arc::new(move |event: &MessageEvent| {
            dispatcher.on_message(event);
        }));

        tracing::debug!(
            "RPC server on {} accepting {:?}",
            window.origin(),
            inner.allowed_origins
        );

        Self {
            window,
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Build a server whose allow-list comes from the page configuration.
    pub fn from_config(window: FrameRef, config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(window, config.rpc_allowed_origins.iter().cloned()))
    }

    /// Register an async method, replacing any method of the same name.
    pub fn register<F, Fut, R, E>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        self.register_handler(name, registry::async_handler(handler));
    }

    /// Register a synchronous method, replacing any method of the same name.
    pub fn register_fn<F, R, E>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> std::result::Result<R, E> + Send + Sync + 'static,
        R: Serialize,
        E: Display,
    {
        self.register_handler(name, registry::sync_handler(handler));
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        if self.inner.methods.insert(name.clone(), handler) {
            tracing::debug!("Replaced RPC method {}", name);
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.inner.methods.names()
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.inner.allowed_origins
    }

    /// Resolves with the frame of the first caller, once one has been seen.
    pub async fn sidebar_window(&self) -> SidebarWindow {
        self.inner.sidebar.wait().await
    }

    pub fn try_sidebar_window(&self) -> Option<SidebarWindow> {
        self.inner.sidebar.get()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop listening. Handlers still running will not get their responses
    /// sent.
    pub fn off(&self) {
        self.inner.active.store(false, Ordering::SeqCst);

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = listener {
            self.window.remove_message_listener(id);
            tracing::debug!("RPC server on {} stopped", self.window.origin());
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.off();
    }
}

impl Inner {
    fn on_message(self: &Arc<Self>, event: &MessageEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        if !self.allowed_origins.iter().any(|origin| *origin == event.origin) {
            tracing::debug!("Ignoring message from disallowed origin {}", event.origin);
            return;
        }

        let (id, call) = match Message::classify(&event.data) {
            Message::Request { id, call } => (Some(id), call),
            Message::Notification(call) => (None, call),
            Message::Response(_) | Message::Unrecognized => return,
        };

        let captured = self.sidebar.resolve(SidebarWindow {
            frame: event.source.clone(),
            origin: event.origin.clone(),
        });
        if captured {
            tracing::info!("Sidebar window captured at {}", event.origin);
        }

        match id {
            Some(id) => self.handle_request(id, call, event),
            None => self.handle_notification(call),
        }
    }

    fn handle_notification(&self, call: Call) {
        let Some(method) = call.method().map(str::to_string) else {
            tracing::warn!("Ignoring notification without a method name");
            return;
        };

        let Some(handler) = self.methods.get(&method) else {
            tracing::warn!("Notification for unregistered method {}", method);
            return;
        };

        let params = match call.params() {
            Ok(params) => params,
            Err(error) => {
                tracing::warn!("Notification {}: {}", method, error.message);
                return;
            }
        };

        let fut = registry::invoke(&handler, params);
        tokio::spawn(async move {
            if let Err(error) = fut.await {
                tracing::error!("Notification handler {} failed: {}", method, error);
            }
        });
    }

    fn handle_request(self: &Arc<Self>, id: Value, call: Call, event: &MessageEvent) {
        let Some(id) = RequestId::from_value(&id) else {
            self.respond(
                &event.source,
                &event.origin,
                Response::error(
                    JsonRpcError::invalid_request("request id invalid"),
                    RequestId::Null,
                ),
            );
            return;
        };

        let Some(handler) = call.method().and_then(|method| self.methods.get(method)) else {
            self.respond(
                &event.source,
                &event.origin,
                Response::error(
                    JsonRpcError::invalid_request("method name not recognized"),
                    id,
                ),
            );
            return;
        };

        let params = match call.params() {
            Ok(params) => params,
            Err(error) => {
                self.respond(&event.source, &event.origin, Response::error(error, id));
                return;
            }
        };

        tracing::debug!(
            "Handling {} request {} from {}",
            call.method().unwrap_or_default(),
            id,
            event.origin
        );

        let fut = registry::invoke(&handler, params);
        let inner = self.clone();
        let source = event.source.clone();
        let origin = event.origin.clone();
        tokio::spawn(async move {
            let response = match fut.await {
                Ok(result) => Response::success(result, id),
                Err(error) => Response::error(JsonRpcError::invalid_request(error.0), id),
            };
            inner.respond(&source, &origin, response);
        });
    }

    fn respond(&self, target: &FrameRef, origin: &str, response: Response) {
        if !self.active.load(Ordering::SeqCst) {
            tracing::debug!("Server stopped, dropping response {}", response.id);
            return;
        }

        let Some(window) = self.window.upgrade() else {
            return;
        };

        let message = match serde_json::to_value(&response) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to serialize response {}: {}", response.id, e);
                return;
            }
        };

        if let Err(e) = target.post_message(message, origin, window) {
            tracing::warn!("Failed to send response to {}: {}", origin, e);
        }
    }
}
