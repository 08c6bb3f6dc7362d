//! HTTP JSON-RPC server
//!
//! Accept loop and configuration for serving an [`RpcServer`] over HTTP/1.1.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use jsonrpc_dispatch::{Handler, RpcServer};

use crate::{Result, RpcHttpHandler};

/// Pause after a failed accept. Errors such as EMFILE persist until some
/// connection closes, so retrying at once would spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the HTTP JSON-RPC server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for the JSON-RPC endpoint
    pub rpc_path: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rpc_path: "/rpc".to_string(),
            enable_cors: true,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Builder for [`HttpRpcServer`]
pub struct HttpRpcServerBuilder {
    config: ServerConfig,
    rpc: Option<RpcServer>,
    fixed_routes: HashMap<String, Handler>,
}

impl HttpRpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            rpc: None,
            fixed_routes: HashMap::new(),
        }
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the JSON-RPC endpoint path
    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.config.rpc_path = path.into();
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Serve this engine instead of a fresh default one
    pub fn rpc_server(mut self, rpc: RpcServer) -> Self {
        self.rpc = Some(rpc);
        self
    }

    /// Answer single requests posted to `path` with `handler`, whatever their
    /// method. Batches are rejected on such paths.
    pub fn handler_route(mut self, path: impl Into<String>, handler: Handler) -> Self {
        self.fixed_routes.insert(path.into(), handler);
        self
    }

    pub fn build(self) -> HttpRpcServer {
        let rpc = self.rpc.unwrap_or_default();
        HttpRpcServer {
            handler: RpcHttpHandler::with_routes(self.config, rpc, self.fixed_routes),
        }
    }
}

impl Default for HttpRpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP JSON-RPC server
#[derive(Clone)]
pub struct HttpRpcServer {
    handler: RpcHttpHandler,
}

impl HttpRpcServer {
    pub fn builder() -> HttpRpcServerBuilder {
        HttpRpcServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        self.handler.config()
    }

    /// The engine behind this server; handlers may be registered at any time.
    pub fn rpc(&self) -> &RpcServer {
        self.handler.rpc()
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config().bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` completes. Connections already accepted are
    /// left to finish on their own tasks.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!("HTTP JSON-RPC server listening on {}", local_addr);
        info!("JSON-RPC endpoint available at: {}", self.config().rpc_path);

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        back_off_after_accept_error(&err).await;
                        continue;
                    }
                },
                () = &mut shutdown => {
                    info!("HTTP JSON-RPC server on {} shutting down", local_addr);
                    return Ok(());
                }
            };
            debug!("New connection from {}", peer_addr);

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle_request(req, Some(peer_addr)).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    // Filter out common client disconnection errors that aren't actual problems
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}

async fn back_off_after_accept_error(err: &io::Error) {
    error!("Failed to accept connection: {}", err);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
