//! LMS Bridge Server Library
//!
//! The page side of the cross-frame RPC bridge: a JSON-RPC server bound to
//! the LMS window and the services it exposes to the embedded client.

pub mod client_rpc;
pub mod registry;
pub mod server;
pub mod sidebar;

pub use client_rpc::{ClientRpc, FocusedUser};
pub use registry::{Handler, HandlerError, MethodRegistry};
pub use server::{Server, ServerError};
pub use sidebar::SidebarWindow;
