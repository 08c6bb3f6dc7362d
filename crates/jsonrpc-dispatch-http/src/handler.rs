//! HTTP request handler for JSON-RPC

use std::collections::HashMap;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use tracing::{debug, error, warn};

use jsonrpc_dispatch::response::INTERNAL_ERROR_BODY;
use jsonrpc_dispatch::{Handler, RpcServer};

use crate::{CorsLayer, ServerConfig};

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const ALLOWED_METHODS: &str = "POST, OPTIONS";

/// Connection details attached to every call made over HTTP.
///
/// Handlers read it with `ctx.transport::<PeerInfo>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote_addr: SocketAddr,
}

/// Routes HTTP requests into an [`RpcServer`].
#[derive(Clone)]
pub struct RpcHttpHandler {
    config: Arc<ServerConfig>,
    rpc: RpcServer,
    /// Paths answered by one fixed handler instead of the registry
    fixed_routes: Arc<HashMap<String, Handler>>,
}

impl RpcHttpHandler {
    pub fn new(config: ServerConfig, rpc: RpcServer) -> Self {
        Self::with_routes(config, rpc, HashMap::new())
    }

    pub(crate) fn with_routes(config: ServerConfig, rpc: RpcServer, fixed_routes: HashMap<String, Handler>) -> Self {
        Self {
            config: Arc::new(config),
            rpc,
            fixed_routes: Arc::new(fixed_routes),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rpc(&self) -> &RpcServer {
        &self.rpc
    }

    /// Handle one HTTP request. `peer` is attached to the call as [`PeerInfo`].
    pub async fn handle_request<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        debug!("Handling {} {}", req.method(), req.uri().path());

        let fixed = self.fixed_routes.get(req.uri().path()).cloned();
        if fixed.is_none() && req.uri().path() != self.config.rpc_path {
            return self.with_cors(plain_response(StatusCode::NOT_FOUND, "Not Found"));
        }

        let response = match req.method() {
            &Method::POST => self.handle_post(req, peer, fixed.as_ref()).await,
            &Method::OPTIONS => preflight_response(),
            _ => method_not_allowed(),
        };
        self.with_cors(response)
    }

    async fn handle_post<B>(&self, req: Request<B>, peer: Option<SocketAddr>, fixed: Option<&Handler>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if let Some(len) = content_length(req.headers())
            && len > self.config.max_body_size
        {
            warn!("Request body too large: {} bytes", len);
            return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }

        let body = match Limited::new(req.into_body(), self.config.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("Request body exceeded {} bytes", self.config.max_body_size);
                return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(err) => {
                error!("Failed to read request body: {}", err);
                return plain_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        let dispatched = AssertUnwindSafe(async {
            match (fixed, peer) {
                (Some(handler), _) => self.rpc.call_handler(&body, handler),
                (None, Some(remote_addr)) => self.rpc.call_with(&body, Arc::new(PeerInfo { remote_addr })).await,
                (None, None) => self.rpc.call(&body).await,
            }
        })
        .catch_unwind()
        .await;

        match dispatched {
            Ok(response) if response.is_empty() => {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::NO_CONTENT;
                response
            }
            Ok(response) => json_response(response.to_bytes()),
            Err(_) => {
                error!("JSON-RPC dispatch panicked");
                json_response(Bytes::from_static(INTERNAL_ERROR_BODY))
            }
        }
    }

    fn with_cors(&self, mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        if self.config.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        response
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

fn json_response(body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Handle OPTIONS preflight requests
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpc_dispatch::RequestContext;
    use serde_json::{Value, json};

    fn create_test_handler(config: ServerConfig) -> RpcHttpHandler {
        let rpc = RpcServer::new();
        rpc.register_handler("subtract", |ctx: &mut RequestContext| {
            match ctx.parse_params::<(i64, i64)>() {
                Ok((a, b)) => ctx.encode_result(a - b),
                Err(err) => ctx.set_error(err),
            }
        });
        rpc.register_handler("peer", |ctx: &mut RequestContext| {
            let addr = ctx.transport::<PeerInfo>().map(|peer| peer.remote_addr.to_string());
            ctx.encode_result(addr);
        });
        rpc.register_handler("update", |_ctx: &mut RequestContext| {});

        let mut routes = HashMap::new();
        let fixed: Handler = Arc::new(|ctx: &mut RequestContext| ctx.encode_result("fixed"));
        routes.insert("/handler".to_string(), fixed);
        RpcHttpHandler::with_routes(config, rpc, routes)
    }

    fn post(path: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_dispatches() {
        let handler = create_test_handler(ServerConfig::default());
        let response = handler
            .handle_request(post("/rpc", r#"{"jsonrpc":"2.0","method":"subtract","params":[42,23],"id":1}"#), None)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);
        assert_eq!(body_json(response).await, json!({"jsonrpc": "2.0", "result": 19, "id": 1}));
    }

    #[tokio::test]
    async fn test_notification_is_no_content() {
        let handler = create_test_handler(ServerConfig::default());
        let response = handler
            .handle_request(post("/rpc", r#"{"jsonrpc":"2.0","method":"update"}"#), None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_protocol_errors_are_ok_status() {
        let handler = create_test_handler(ServerConfig::default());
        let response = handler.handle_request(post("/rpc", "{not json"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let config = ServerConfig {
            max_body_size: 16,
            ..ServerConfig::default()
        };
        let handler = create_test_handler(config);
        let response = handler
            .handle_request(post("/rpc", r#"{"jsonrpc":"2.0","method":"update"}"#), None)
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_routing() {
        let handler = create_test_handler(ServerConfig::default());

        let response = handler.handle_request(post("/other", "{}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let get = Request::builder()
            .method(Method::GET)
            .uri("/rpc")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler.handle_request(get, None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), ALLOWED_METHODS);

        let options = Request::builder()
            .method(Method::OPTIONS)
            .uri("/rpc")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler.handle_request(options, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Access-Control-Allow-Origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn test_cors_disabled() {
        let config = ServerConfig {
            enable_cors: false,
            ..ServerConfig::default()
        };
        let handler = create_test_handler(config);
        let response = handler
            .handle_request(post("/rpc", r#"{"jsonrpc":"2.0","method":"update","id":1}"#), None)
            .await;
        assert!(response.headers().get("Access-Control-Allow-Origin").is_none());
    }

    #[tokio::test]
    async fn test_peer_info_attached() {
        let handler = create_test_handler(ServerConfig::default());
        let peer: SocketAddr = "192.0.2.10:5000".parse().unwrap();
        let response = handler
            .handle_request(post("/rpc", r#"{"jsonrpc":"2.0","method":"peer","id":1}"#), Some(peer))
            .await;
        assert_eq!(body_json(response).await["result"], "192.0.2.10:5000");
    }

    #[tokio::test]
    async fn test_fixed_route() {
        let handler = create_test_handler(ServerConfig::default());
        let response = handler
            .handle_request(post("/handler", r#"{"jsonrpc":"2.0","method":"whatever","id":7}"#), None)
            .await;
        assert_eq!(body_json(response).await, json!({"jsonrpc": "2.0", "result": "fixed", "id": 7}));

        // Batches are not accepted on fixed routes.
        let response = handler
            .handle_request(post("/handler", r#"[{"jsonrpc":"2.0","method":"whatever","id":7}]"#), None)
            .await;
        assert_eq!(body_json(response).await["error"]["code"], -32600);
    }
}
