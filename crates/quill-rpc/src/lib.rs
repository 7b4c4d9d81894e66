//! Newline-delimited JSON-RPC 2.0 over the stdio of a shell-launched subprocess.
//!
//! [`ProcessTransport`] owns the child process and its pipes, [`RpcConnection`]
//! layers request/response correlation and inbound dispatch on top, and the
//! [`responder`] module answers server-initiated requests with fixed,
//! non-interactive decisions.

mod connection;
mod error;
mod message;
pub mod responder;
mod transport;

pub use connection::{
    ClientInfo, IgnoreNotifications, NotificationHandler, PendingRequests, RpcConnection,
};
pub use error::RpcError;
pub use message::{
    normalize_request_id, notification_frame, request_frame, response_frame, MessageKind,
    RpcMessage, JSONRPC_VERSION,
};
pub use transport::{
    LineBuffer, LineWriter, ProcessTransport, StderrTail, TransportConfig, DEFAULT_SHELL,
    DEFAULT_STDERR_TAIL_CAPACITY,
};
