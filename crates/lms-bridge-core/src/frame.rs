//! Cross-frame message bus
//!
//! A [`Frame`] is anything that can receive posted messages and notify
//! listeners about them: a browser window bound through an FFI layer, or the
//! [`InMemoryWindow`] used by the demo binary and the tests.

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub type FrameRef = Arc<dyn Frame>;

pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid target origin: {0}")]
    InvalidTargetOrigin(String),

    #[error("Frame {0} is closed")]
    Closed(String),
}

/// Handle returned by [`Frame::add_message_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A message delivered to a frame
#[derive(Clone)]
pub struct MessageEvent {
    /// Origin of the sending frame
    pub origin: String,
    /// The sending frame, used to address replies
    pub source: FrameRef,
    pub data: Value,
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("origin", &self.origin)
            .field("source", &self.source.origin())
            .field("data", &self.data)
            .finish()
    }
}

pub trait Frame: Send + Sync {
    /// Serialized origin of this frame, e.g. `https://lms.example.com`
    fn origin(&self) -> &str;

    /// Queue `message` for delivery to this frame.
    ///
    /// The message is only delivered if `target_origin` matches this frame's
    /// origin; otherwise it is dropped without error. `source` is the frame
    /// the message comes from.
    fn post_message(
        &self,
        message: Value,
        target_origin: &str,
        source: FrameRef,
    ) -> Result<(), TransportError>;

    fn add_message_listener(&self, listener: MessageListener) -> ListenerId;

    /// Returns false if the listener was not registered.
    fn remove_message_listener(&self, id: ListenerId) -> bool;
}

/// Normalize `origin` to its ASCII serialization.
///
/// Full URLs are accepted and reduced to their origin. The `"*"` wildcard and
/// opaque origins are rejected.
pub fn serialized_origin(origin: &str) -> Result<String, TransportError> {
    let url = url::Url::parse(origin)
        .map_err(|_| TransportError::InvalidTargetOrigin(origin.to_string()))?;
    let origin_of = url.origin();
    if !origin_of.is_tuple() {
        return Err(TransportError::InvalidTargetOrigin(origin.to_string()));
    }
    Ok(origin_of.ascii_serialization())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type ListenerTable = Arc<Mutex<Vec<(ListenerId, MessageListener)>>>;

/// In-process frame with browser-like delivery semantics.
///
/// Posted messages are queued and handed to listeners by a dispatcher task in
/// FIFO order, never synchronously from `post_message`.
pub struct InMemoryWindow {
    origin: String,
    listeners: ListenerTable,
    next_listener_id: AtomicU64,
    queue: Mutex<Option<mpsc::UnboundedSender<MessageEvent>>>,
}

impl InMemoryWindow {
    /// Create a window and spawn its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        let origin = origin.into();
        let origin = serialized_origin(&origin).unwrap_or(origin);
        let listeners: ListenerTable = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::dispatch_loop(origin.clone(), rx, listeners.clone()));

        Arc::new(Self {
            origin,
            listeners,
            next_listener_id: AtomicU64::new(1),
            queue: Mutex::new(Some(tx)),
        })
    }

    async fn dispatch_loop(
        origin: String,
        mut rx: mpsc::UnboundedReceiver<MessageEvent>,
        listeners: ListenerTable,
    ) {
        while let Some(event) = rx.recv().await {
            // Snapshot so listeners may add or remove listeners while running
            let snapshot: Vec<MessageListener> = lock(&listeners)
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();

            tracing::trace!(
                "{}: delivering message from {} to {} listeners",
                origin,
                event.origin,
                snapshot.len()
            );
            for listener in snapshot {
                listener(&event);
            }
        }
        tracing::debug!("{}: dispatcher stopped", origin);
    }

    /// Stop accepting messages. Already queued messages are still delivered.
    pub fn close(&self) {
        lock(&self.queue).take();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.queue).is_none()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl fmt::Debug for InMemoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryWindow")
            .field("origin", &self.origin)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Frame for InMemoryWindow {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn post_message(
        &self,
        message: Value,
        target_origin: &str,
        source: FrameRef,
    ) -> Result<(), TransportError> {
        let target = serialized_origin(target_origin)?;
        if target != self.origin {
            tracing::debug!(
                "Dropping message for {}: frame origin is {}",
                target,
                self.origin
            );
            return Ok(());
        }

        let event = MessageEvent {
            origin: source.origin().to_string(),
            source,
            data: message,
        };

        match lock(&self.queue).as_ref() {
            Some(tx) => tx
                .send(event)
                .map_err(|_| TransportError::Closed(self.origin.clone())),
            None => Err(TransportError::Closed(self.origin.clone())),
        }
    }

    fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}
