//! Request ID generation

use lms_bridge_core::RequestId;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

/// Number of hex characters in a random id (40 bits)
pub const RANDOM_ID_LEN: usize = 10;

/// Source of correlation ids for outgoing requests
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> RequestId;
}

/// Random lowercase hex ids, e.g. `"3f9a0c12be"`
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomHexIds;

impl IdGenerator for RandomHexIds {
    fn next_id(&self) -> RequestId {
        // The first 12 hex digits of a v4 UUID are all random
        let hex = uuid::Uuid::new_v4().simple().to_string();
        RequestId::String(hex[..RANDOM_ID_LEN].to_string())
    }
}

/// Monotonic numeric ids starting at 1
#[derive(Debug)]
pub struct SequentialIds {
    counter: AtomicI64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            counter: AtomicI64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> RequestId {
        RequestId::from(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// Process-wide generator used when a client is not given one
pub fn default_generator() -> Arc<dyn IdGenerator> {
    static DEFAULT: OnceLock<Arc<dyn IdGenerator>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(RandomHexIds)).clone()
}
