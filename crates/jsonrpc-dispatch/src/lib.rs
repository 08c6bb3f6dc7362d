//! # JSON-RPC 2.0 Dispatch Engine
//!
//! A transport-agnostic JSON-RPC 2.0 server core. It takes raw request bytes,
//! resolves each call against a [`MethodRegistry`] and writes protocol-exact
//! responses.
//!
//! ## Features
//! - Single calls and batches of up to [`MAX_BATCH_LEN`] items
//! - Batch items run concurrently and are answered in request order
//! - Notifications never produce output, whatever the handler does
//! - Pooled per-request contexts, node arenas and output buffers
//! - Handler panics are contained to the request that caused them
//! - `#[rpc_service]` exports a type's methods as `Type.method`
//!
//! ```rust
//! use jsonrpc_dispatch::{RequestContext, RpcServer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let server = RpcServer::new();
//! server.register_handler("ping", |ctx: &mut RequestContext| {
//!     let pong = ctx.arena().new_string("pong");
//!     ctx.set_result(pong);
//! });
//!
//! let response = server.call(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
//! assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":"pong","id":1}"#);
//! # }
//! ```

// Lets macro-generated `::jsonrpc_dispatch::...` paths resolve inside this crate.
extern crate self as jsonrpc_dispatch;

pub mod arena;
pub mod batch;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod payload;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod response;

pub use arena::Arena;
pub use batch::MAX_BATCH_LEN;
pub use config::DispatchConfig;
pub use context::{Attachment, RequestContext};
pub use dispatch::{Response, RpcServer, RpcServerBuilder, ServerStats};
pub use error::{JsonRpcErrorCode, RegistryError, RpcError};
pub use payload::{Encoder, ErrorPayload, Payload};
pub use pool::{Buffer, Pool, PoolStats, Pooled, Recycle};
pub use registry::{Handler, MethodRegistry, RpcService};

#[cfg(feature = "derive")]
pub use jsonrpc_dispatch_derive::rpc_service;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// Code used for handler errors that carry no code of their own.
    pub const SERVER_ERROR: i64 = -32000;
}
