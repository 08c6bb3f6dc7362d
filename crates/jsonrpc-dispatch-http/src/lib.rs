//! # HTTP JSON-RPC Server
//!
//! HTTP/1.1 transport for [`jsonrpc_dispatch`]. Request bodies posted to the
//! configured path are handed to [`jsonrpc_dispatch::RpcServer::call_with`]
//! with the caller's address attached as [`PeerInfo`].
//!
//! ## Features
//! - Body size limit (`413 Payload Too Large`)
//! - `204 No Content` when a request produced no response (notifications)
//! - CORS headers and `OPTIONS` preflight
//! - Extra paths bound to a single handler, bypassing the registry
//! - Panics escaping the engine are answered with a JSON-RPC Internal error

pub mod cors;
pub mod handler;
pub mod server;

// Re-export main types
pub use cors::CorsLayer;
pub use handler::{PeerInfo, RpcHttpHandler};
pub use server::{HttpRpcServer, HttpRpcServerBuilder, ServerConfig};

// Re-export the engine
pub use jsonrpc_dispatch;

/// Result type for HTTP JSON-RPC operations
pub type Result<T> = std::result::Result<T, HttpRpcError>;

/// HTTP transport errors
#[derive(Debug, thiserror::Error)]
pub enum HttpRpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] jsonrpc_dispatch::RegistryError),
}
