//! Method registry

use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

/// Failure reported by a handler. The message is sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        Self(message)
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// A registered method: positional params in, JSON result out
pub type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Wrap an async function as a [`Handler`]
pub fn async_handler<F, Fut, R, E>(handler: F) -> Handler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    Arc::new(move |params| {
        let fut = handler(params);
        async move {
            let value = fut.await.map_err(|e| HandlerError(e.to_string()))?;
            to_result(value)
        }
        .boxed()
    })
}

/// Wrap a plain function as a [`Handler`]
pub fn sync_handler<F, R, E>(handler: F) -> Handler
where
    F: Fn(Vec<Value>) -> Result<R, E> + Send + Sync + 'static,
    R: Serialize,
    E: Display,
{
    Arc::new(move |params| {
        let result = handler(params)
            .map_err(|e| HandlerError(e.to_string()))
            .and_then(to_result);
        future::ready(result).boxed()
    })
}

fn to_result<R: Serialize>(value: R) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError(e.to_string()))
}

/// Run a handler, turning panics into handler errors.
pub(crate) fn invoke(handler: &Handler, params: Vec<Value>) -> HandlerFuture {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
        Ok(fut) => fut,
        Err(panic) => return future::ready(Err(HandlerError::from_panic(panic))).boxed(),
    };

    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|outcome| outcome.unwrap_or_else(|panic| Err(HandlerError::from_panic(panic))))
        .boxed()
}

/// Method name to handler mapping. Entries are only ever added or replaced.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Handler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an earlier handler was replaced.
    pub fn insert(&self, name: impl Into<String>, handler: Handler) -> bool {
        self.methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
