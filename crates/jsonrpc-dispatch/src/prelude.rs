//! # JSON-RPC Dispatch Prelude
//!
//! Re-exports of the types most handlers and servers need.
//!
//! ```rust
//! use jsonrpc_dispatch::prelude::*;
//! ```

// Server and handler types
pub use crate::context::RequestContext;
pub use crate::dispatch::{Response, RpcServer};
pub use crate::registry::{Handler, RpcService};

// Outcome types
pub use crate::error::{JsonRpcErrorCode, RpcError};
pub use crate::payload::{ErrorPayload, Payload};

#[cfg(feature = "derive")]
pub use crate::rpc_service;

// Standard error codes
pub use crate::error_codes::*;
