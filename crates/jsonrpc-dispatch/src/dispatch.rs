//! Request dispatcher.
//!
//! [`RpcServer::call`] takes a raw body and walks it through parse, shape
//! checks, lookup and invocation. Single requests run to completion on the
//! calling task; arrays go to the batch coordinator.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error};

use crate::batch;
use crate::config::DispatchConfig;
use crate::context::{Attachment, RequestContext};
use crate::error::{RegistryError, RpcError};
use crate::pool::{Buffer, Pool, PoolStats, Pooled};
use crate::registry::{Handler, MethodRegistry, RpcService};
use crate::response::{INVALID_REQUEST_BODY, PARSE_ERROR_BODY};

/// Counters for the server's context and buffer pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub contexts: PoolStats,
    pub buffers: PoolStats,
}

struct Shared {
    config: DispatchConfig,
    registry: MethodRegistry,
    contexts: Arc<Pool<RequestContext>>,
    buffers: Arc<Pool<Buffer>>,
}

/// JSON-RPC 2.0 server. Cheap to clone; clones share the registry and pools.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Shared>,
}

impl RpcServer {
    /// Server with default configuration and an empty registry.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    /// See [`MethodRegistry::register_handler`].
    pub fn register_handler<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.inner.registry.register_handler(method, handler);
    }

    pub fn insert_handler(&self, method: impl Into<String>, handler: Handler) {
        self.inner.registry.insert_handler(method, handler);
    }

    /// See [`MethodRegistry::register_service`].
    pub fn register_service<S>(&self, service: Arc<S>) -> Result<(), RegistryError>
    where
        S: RpcService,
    {
        self.inner.registry.register_service(service)
    }

    pub fn register_service_named<S>(&self, name: impl Into<String>, service: Arc<S>) -> Result<(), RegistryError>
    where
        S: RpcService,
    {
        self.inner.registry.register_service_named(name, service)
    }

    /// Take a cleared context from the pool.
    pub fn acquire_context(&self) -> Pooled<RequestContext> {
        let mut ctx = self.inner.contexts.acquire();
        ctx.limit_retained(self.inner.config.max_retained_buffer_capacity);
        ctx
    }

    /// Take an empty output buffer from the pool.
    pub fn acquire_buffer(&self) -> Pooled<Buffer> {
        let mut buf = self.inner.buffers.acquire();
        buf.limit_retained(self.inner.config.max_retained_buffer_capacity);
        buf
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            contexts: self.inner.contexts.stats(),
            buffers: self.inner.buffers.stats(),
        }
    }

    /// Dispatch one request body: a single call or a batch.
    ///
    /// Single calls never suspend. Batch items run on tokio's blocking pool,
    /// so batches must be dispatched from inside a tokio runtime.
    pub async fn call(&self, body: &[u8]) -> Response {
        self.call_inner(body, None).await
    }

    /// Like [`call`](Self::call), with a transport value that handlers can
    /// read through [`RequestContext::transport`]. Every batch item sees the
    /// same attachment.
    pub async fn call_with(&self, body: &[u8], transport: Attachment) -> Response {
        self.call_inner(body, Some(transport)).await
    }

    /// Dispatch a single request straight to `handler`, bypassing the registry.
    /// Batches are not accepted on this path.
    pub fn call_handler(&self, body: &[u8], handler: &Handler) -> Response {
        match self.parse(body) {
            Ok(request @ Value::Object(_)) => self.call_single(request, None, Some(handler)),
            Ok(_) => self.fixed(INVALID_REQUEST_BODY),
            Err(response) => response,
        }
    }

    async fn call_inner(&self, body: &[u8], transport: Option<Attachment>) -> Response {
        match self.parse(body) {
            Ok(Value::Array(items)) => batch::dispatch_batch(self, items, transport).await,
            Ok(request @ Value::Object(_)) => self.call_single(request, transport, None),
            Ok(_) => self.fixed(INVALID_REQUEST_BODY),
            Err(response) => response,
        }
    }

    fn parse(&self, body: &[u8]) -> Result<Value, Response> {
        serde_json::from_slice(body).map_err(|err| {
            debug!(error = %err, "failed to parse request body");
            self.fixed(PARSE_ERROR_BODY)
        })
    }

    fn call_single(&self, request: Value, transport: Option<Attachment>, fixed: Option<&Handler>) -> Response {
        let mut ctx = self.acquire_context();
        ctx.attach_transport(transport);
        if let Some(handler) = self.prepare(&mut ctx, request, fixed) {
            invoke(&mut ctx, &handler);
            finish(&mut ctx);
        }
        Response::new(ctx.take_output(self.acquire_buffer()))
    }

    /// Load `request` into `ctx` and resolve its handler. When the request
    /// cannot be dispatched the error response is already written and `None`
    /// is returned.
    pub(crate) fn prepare(&self, ctx: &mut RequestContext, request: Value, fixed: Option<&Handler>) -> Option<Handler> {
        ctx.set_request(request);
        if ctx.method().is_empty() {
            ctx.write_fixed(INVALID_REQUEST_BODY);
            return None;
        }
        if let Some(handler) = fixed {
            return Some(Arc::clone(handler));
        }
        let handler = self.inner.registry.lookup(ctx.method());
        if handler.is_none() {
            debug!(method = %ctx.method(), "method not found");
            ctx.set_error(RpcError::method_not_found());
            ctx.write_response();
        }
        handler
    }

    pub(crate) fn fixed(&self, body: &[u8]) -> Response {
        let mut buf = self.acquire_buffer();
        buf.extend_from_slice(body);
        Response::new(buf)
    }

    pub(crate) fn batch_item_timeout(&self) -> Option<Duration> {
        self.inner.config.batch_item_timeout
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Builder for [`RpcServer`]
pub struct RpcServerBuilder {
    config: DispatchConfig,
    registry: MethodRegistry,
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            registry: MethodRegistry::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_idle_contexts(mut self, max: usize) -> Self {
        self.config.max_idle_contexts = max;
        self
    }

    pub fn max_idle_buffers(mut self, max: usize) -> Self {
        self.config.max_idle_buffers = max;
        self
    }

    /// Set the capacity released buffers may keep
    pub fn max_retained_buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.max_retained_buffer_capacity = bytes;
        self
    }

    /// Give every batch item a deadline
    pub fn batch_item_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_item_timeout = Some(timeout);
        self
    }

    /// Register a handler in the default service
    pub fn handler<F>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.registry.register_handler(method, handler);
        self
    }

    pub fn build(self) -> RpcServer {
        RpcServer {
            inner: Arc::new(Shared {
                contexts: Pool::new(self.config.max_idle_contexts),
                buffers: Pool::new(self.config.max_idle_buffers),
                registry: self.registry,
                config: self.config,
            }),
        }
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `handler`, turning a panic into an Internal error on the context.
pub(crate) fn invoke(ctx: &mut RequestContext, handler: &Handler) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
        error!(
            method = %ctx.method(),
            panic = %panic_message(panic.as_ref()),
            "handler panicked"
        );
        ctx.clear_outcome();
        ctx.set_error(RpcError::internal_error());
    }
}

/// Write the response for an invoked context. A `Serialize` impl that panics
/// mid-write is replaced by an Internal error.
pub(crate) fn finish(ctx: &mut RequestContext) {
    let mark = ctx.output_mut().len();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| ctx.write_response())) {
        error!(
            method = %ctx.method(),
            panic = %panic_message(panic.as_ref()),
            "response encoding panicked"
        );
        ctx.output_mut().truncate(mark);
        ctx.clear_outcome();
        ctx.set_error(RpcError::internal_error());
        ctx.write_response();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Encoded response bytes. Empty when nothing is to be sent (notifications,
/// all-notification batches).
///
/// The bytes live in a pooled buffer that is returned when the response drops.
pub struct Response {
    body: Pooled<Buffer>,
}

impl Response {
    pub(crate) fn new(body: Pooled<Buffer>) -> Self {
        Self { body }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Copy the body out, e.g. to hand it to an HTTP body type.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }
}

impl Deref for Response {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.body
    }
}

impl AsRef<[u8]> for Response {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Response")
            .field(&String::from_utf8_lossy(&self.body))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use serde::Deserialize;
    use serde::ser::{Serialize, Serializer};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SubtractParams {
        Positional(i64, i64),
        Named { minuend: i64, subtrahend: i64 },
    }

    fn subtract(ctx: &mut RequestContext) {
        match ctx.parse_params::<SubtractParams>() {
            Ok(SubtractParams::Positional(a, b)) | Ok(SubtractParams::Named { minuend: a, subtrahend: b }) => {
                let n = ctx.arena().new_number_i64(a - b);
                ctx.set_result(n);
            }
            Err(err) => ctx.set_error(err),
        }
    }

    fn server() -> RpcServer {
        let server = RpcServer::new();
        server.register_handler("subtract", subtract);
        server.register_handler("update", |_ctx: &mut RequestContext| {});
        server.register_handler("boom", |_ctx: &mut RequestContext| panic!("boom"));
        server
    }

    async fn call_json(server: &RpcServer, body: &str) -> Value {
        let response = server.call(body.as_bytes()).await;
        serde_json::from_slice(&response).unwrap()
    }

    #[tokio::test]
    async fn test_positional_and_named_params() {
        let server = server();
        let response = server
            .call(br#"{"jsonrpc":"2.0","method":"subtract","params":[42,23],"id":1}"#)
            .await;
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":19,"id":1}"#);

        let response = server
            .call(br#"{"jsonrpc":"2.0","method":"subtract","params":{"subtrahend":23,"minuend":42},"id":4}"#)
            .await;
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":19,"id":4}"#);
    }

    #[tokio::test]
    async fn test_invalid_params_reported() {
        let server = server();
        let v = call_json(&server, r#"{"jsonrpc":"2.0","method":"subtract","params":"x","id":2}"#).await;
        assert_eq!(v["error"]["code"], -32602);
        assert_eq!(v["id"], 2);
    }

    #[tokio::test]
    async fn test_notification_is_silent() {
        let server = server();
        let response = server
            .call(br#"{"jsonrpc":"2.0","method":"update","params":[1,2,3,4,5]}"#)
            .await;
        assert!(response.is_empty());

        // Unknown methods and panics stay silent for notifications too.
        assert!(server.call(br#"{"jsonrpc":"2.0","method":"foobar"}"#).await.is_empty());
        assert!(server.call(br#"{"jsonrpc":"2.0","method":"boom"}"#).await.is_empty());
    }

    #[tokio::test]
    async fn test_id_echoed_verbatim() {
        let server = server();
        let ids = [
            r#""abc""#,
            "null",
            "-7",
            "1.5",
            r#""""#,
            "1e2",
            "1.50",
            "-0",
            "12345678901234567890123",
            "1E400",
        ];
        for id in ids {
            let body = format!(r#"{{"jsonrpc":"2.0","method":"subtract","params":[2,1],"id":{id}}}"#);
            let response = server.call(body.as_bytes()).await;
            let expected = format!(r#"{{"jsonrpc":"2.0","result":1,"id":{id}}}"#);
            assert_eq!(response.as_bytes(), expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let server = server();
        let response = server.call(br#"{"jsonrpc":"2.0","method":"foobar","id":"1"}"#).await;
        assert_eq!(
            response.as_bytes(),
            br#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":"1"}"#
        );
    }

    #[tokio::test]
    async fn test_parse_error() {
        let server = server();
        let response = server
            .call(br#"{"jsonrpc":"2.0","method":"foobar,"params":"bar","baz]"#)
            .await;
        assert_eq!(response.as_bytes(), PARSE_ERROR_BODY);
    }

    #[tokio::test]
    async fn test_invalid_request_shapes() {
        let server = server();
        for body in [
            r#"{"jsonrpc":"2.0","method":1,"params":"bar"}"#,
            r#"{"jsonrpc":"2.0","method":"","id":3}"#,
            r#"{"foo":"boo"}"#,
            r#"1"#,
            r#""subtract""#,
        ] {
            let response = server.call(body.as_bytes()).await;
            assert_eq!(response.as_bytes(), INVALID_REQUEST_BODY, "{body}");
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panic_becomes_internal_error() {
        let server = server();
        let response = server.call(br#"{"jsonrpc":"2.0","method":"boom","id":9}"#).await;
        assert_eq!(
            response.as_bytes(),
            br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":9}"#
        );
        assert!(logs_contain("handler panicked"));

        // The server keeps working afterwards.
        let v = call_json(&server, r#"{"jsonrpc":"2.0","method":"subtract","params":[3,1],"id":10}"#).await;
        assert_eq!(v["result"], 2);
    }

    struct Explodes;

    impl Serialize for Explodes {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            panic!("cannot serialize");
        }
    }

    #[tokio::test]
    async fn test_panicking_serializer_becomes_internal_error() {
        let server = RpcServer::new();
        server.register_handler("explode", |ctx: &mut RequestContext| ctx.encode_result(Explodes));
        let response = server.call(br#"{"jsonrpc":"2.0","method":"explode","id":1}"#).await;
        assert_eq!(
            response.as_bytes(),
            br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":1}"#
        );
    }

    #[tokio::test]
    async fn test_missing_result_is_null() {
        let server = server();
        let response = server.call(br#"{"jsonrpc":"2.0","method":"update","id":1}"#).await;
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":null,"id":1}"#);
    }

    #[tokio::test]
    async fn test_generic_error_uses_server_error_code() {
        let server = RpcServer::new();
        server.register_handler("fail", |ctx: &mut RequestContext| ctx.fail("disk full"));
        let response = server.call(br#"{"jsonrpc":"2.0","method":"fail","id":1}"#).await;
        assert_eq!(
            response.as_bytes(),
            br#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"disk full"},"id":1}"#
        );
    }

    #[test]
    fn test_call_handler_bypasses_registry() {
        let server = RpcServer::new();
        let handler: Handler = Arc::new(|ctx: &mut RequestContext| {
            let method = ctx.method().to_string();
            ctx.set_result(Payload::encode(method));
        });

        let response = server.call_handler(br#"{"jsonrpc":"2.0","method":"anything","id":1}"#, &handler);
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":"anything","id":1}"#);

        let response = server.call_handler(br#"[{"jsonrpc":"2.0","method":"anything","id":1}]"#, &handler);
        assert_eq!(response.as_bytes(), INVALID_REQUEST_BODY);

        let response = server.call_handler(b"{", &handler);
        assert_eq!(response.as_bytes(), PARSE_ERROR_BODY);
    }

    #[tokio::test]
    async fn test_call_with_attachment() {
        let server = RpcServer::new();
        server.register_handler("peer", |ctx: &mut RequestContext| {
            let peer = ctx.transport::<SocketAddr>().map(ToString::to_string);
            ctx.encode_result(peer);
        });

        let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
        let response = server
            .call_with(br#"{"jsonrpc":"2.0","method":"peer","id":1}"#, Arc::new(addr))
            .await;
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":"10.1.2.3:4567","id":1}"#);

        let response = server.call(br#"{"jsonrpc":"2.0","method":"peer","id":1}"#).await;
        assert_eq!(response.as_bytes(), br#"{"jsonrpc":"2.0","result":null,"id":1}"#);
    }

    #[tokio::test]
    async fn test_contexts_are_reused() {
        let calls = Arc::new(AtomicUsize::new(0));
        let server = RpcServer::builder().max_idle_contexts(4).build();
        let counter = Arc::clone(&calls);
        server.register_handler("count", move |ctx: &mut RequestContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u64;
            let v = ctx.arena().new_number_u64(n);
            ctx.set_result(v);
        });

        for i in 0..10 {
            let v = call_json(&server, r#"{"jsonrpc":"2.0","method":"count","id":1}"#).await;
            assert_eq!(v, json!({"jsonrpc": "2.0", "result": i, "id": 1}));
        }
        let stats = server.stats();
        assert_eq!(stats.contexts.created, 1);
        assert_eq!(stats.contexts.idle, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_builder_config() {
        let server = RpcServer::builder()
            .max_idle_buffers(8)
            .max_retained_buffer_capacity(512)
            .batch_item_timeout(Duration::from_millis(250))
            .handler("subtract", subtract)
            .build();
        assert_eq!(server.config().max_idle_buffers, 8);
        assert_eq!(server.config().max_retained_buffer_capacity, 512);
        assert_eq!(server.batch_item_timeout(), Some(Duration::from_millis(250)));
        assert!(server.registry().lookup("subtract").is_some());
    }
}
