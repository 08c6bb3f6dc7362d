//! # Hello World JSON-RPC Server
//!
//! Serves an `Arith` service plus a few plain handlers over HTTP.
//!
//! ```bash
//! cargo run -p hello-world-server -- --bind 127.0.0.1:8080
//!
//! curl -s http://127.0.0.1:8080/rpc -d '{"jsonrpc":"2.0","method":"Arith.add","params":{"a":2,"b":3},"id":1}'
//! curl -s http://127.0.0.1:8080/rpc -d '[{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2},"id":1},{"jsonrpc":"2.0","method":"echo","params":[1,2]}]'
//! curl -s http://127.0.0.1:8080/handler -d '{"jsonrpc":"2.0","method":"anything","params":{"a":4,"b":5},"id":2}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use jsonrpc_dispatch::{RequestContext, RpcError, RpcServer, rpc_service};
use jsonrpc_dispatch_http::HttpRpcServer;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path of the JSON-RPC endpoint
    #[arg(long, default_value = "/rpc")]
    path: String,

    /// Do not send CORS headers
    #[arg(long)]
    no_cors: bool,
}

#[derive(Debug, Deserialize)]
struct Operands {
    a: i64,
    b: i64,
}

/// Parse `{"a": .., "b": ..}`, reporting Invalid params on failure.
fn operands(ctx: &mut RequestContext) -> Option<Operands> {
    match ctx.parse_params::<Operands>() {
        Ok(operands) => Some(operands),
        Err(err) => {
            ctx.set_error(err);
            None
        }
    }
}

fn set_number(ctx: &mut RequestContext, value: Option<i64>) {
    match value {
        Some(n) => {
            let n = ctx.arena().new_number_i64(n);
            ctx.set_result(n);
        }
        None => ctx.fail("integer overflow"),
    }
}

struct Arith;

#[rpc_service]
impl Arith {
    pub fn add(&self, ctx: &mut RequestContext) {
        if let Some(Operands { a, b }) = operands(ctx) {
            set_number(ctx, a.checked_add(b));
        }
    }

    pub fn mul(&self, ctx: &mut RequestContext) {
        if let Some(Operands { a, b }) = operands(ctx) {
            set_number(ctx, a.checked_mul(b));
        }
    }

    pub fn div(&self, ctx: &mut RequestContext) {
        let Some(Operands { a, b }) = operands(ctx) else {
            return;
        };
        if b == 0 {
            ctx.fail("divide by zero");
            return;
        }
        set_number(ctx, a.checked_div(b));
    }

    pub fn panic(&self, _ctx: &mut RequestContext) {
        panic!("ERROR");
    }

    pub fn error(&self, ctx: &mut RequestContext) {
        ctx.set_error(RpcError::server_error(-32001, "application error"));
    }
}

fn echo(ctx: &mut RequestContext) {
    let params = ctx.params().cloned().unwrap_or_default();
    ctx.set_result(params);
}

fn sum(ctx: &mut RequestContext) {
    if let Some(Operands { a, b }) = operands(ctx) {
        match a.checked_add(b) {
            Some(total) => ctx.encode_result(total),
            None => ctx.fail("integer overflow"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let rpc = RpcServer::new();
    rpc.register_service(Arc::new(Arith))?;
    rpc.register_handler("echo", echo);
    rpc.register_handler("sum", sum);

    let server = HttpRpcServer::builder()
        .bind_address(args.bind)
        .rpc_path(args.path)
        .cors(!args.no_cors)
        .rpc_server(rpc)
        .handler_route("/handler", Arc::new(sum))
        .build();

    info!("Registered methods: {:?}", server.rpc().registry().registered_methods());

    let listener = TcpListener::bind(server.config().bind_address).await?;
    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
