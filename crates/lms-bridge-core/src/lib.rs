pub mod error;
pub mod frame;
pub mod models;
pub mod protocol;
pub mod storage;

pub use error::{Error, Result};
pub use frame::{Frame, FrameRef, InMemoryWindow, ListenerId, MessageEvent, TransportError};
pub use protocol::{Call, JsonRpcError, Message, Notification, Request, RequestId, Response};
