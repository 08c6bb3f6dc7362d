//! # jsonrpc-dispatch Derive Macros
//!
//! - `#[rpc_service]` - export the methods of an inherent `impl` block as a
//!   JSON-RPC service
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jsonrpc_dispatch::{RequestContext, RpcServer, rpc_service};
//! use std::sync::Arc;
//!
//! struct Arith;
//!
//! #[rpc_service]
//! impl Arith {
//!     pub fn add(&self, ctx: &mut RequestContext) { /* ... */ }
//!
//!     #[rpc(name = "mul")]
//!     pub fn multiply(&self, ctx: &mut RequestContext) { /* ... */ }
//! }
//!
//! let server = RpcServer::new();
//! server.register_service(Arc::new(Arith))?; // "Arith.add", "Arith.mul"
//! ```

use proc_macro::TokenStream;
use syn::{ItemImpl, parse_macro_input};

mod service_attr;
mod utils;


/// Attribute macro implementing `RpcService` for an inherent `impl` block.
///
/// Every method shaped `pub fn name(&self, ctx: &mut RequestContext)` (no
/// generics, not `async`, unit return) is exported under its own name. Other
/// methods are left alone.
///
/// # Method attributes
///
/// - `#[rpc(name = "...")]` - export under a different name
/// - `#[rpc(skip)]` - do not export this method
///
/// Putting `#[rpc(...)]` on a method with any other shape is an error.
#[proc_macro_attribute]
pub fn rpc_service(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = proc_macro2::TokenStream::from(args);
    let input = parse_macro_input!(input as ItemImpl);
    service_attr::rpc_service_impl(args, input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
