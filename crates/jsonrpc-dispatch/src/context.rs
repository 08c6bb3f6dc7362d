//! Per-invocation request state.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::arena::Arena;
use crate::error::RpcError;
use crate::payload::{ErrorPayload, Payload};
use crate::pool::{Buffer, Pooled, Recycle};
use crate::response;

/// Transport-specific value attached to a call (peer address, headers, ...).
pub type Attachment = Arc<dyn Any + Send + Sync>;

/// State for one request or one batch item.
///
/// Contexts are drawn from the server's pool, handed to exactly one handler and
/// returned when their guard drops. The handler sees the parsed request through
/// [`method`](Self::method), [`params`](Self::params) and [`id`](Self::id), and
/// reports its outcome through [`set_result`](Self::set_result) or
/// [`set_error`](Self::set_error). If both slots end up set, the error wins.
#[derive(Debug, Default)]
pub struct RequestContext {
    request: Value,
    method: String,
    id: Vec<u8>,
    has_id: bool,
    arena: Arena,
    out: Vec<u8>,
    scratch: Vec<u8>,
    result: Option<Payload>,
    error: Option<ErrorPayload>,
    transport: Option<Attachment>,
    max_retained: Option<usize>,
}

impl RequestContext {
    /// Load a request object. `method` must be a JSON string or it stays empty;
    /// the `id` is copied out as raw JSON so it outlives the request tree.
    pub(crate) fn set_request(&mut self, request: Value) {
        self.method.clear();
        self.id.clear();
        self.has_id = false;

        if let Some(Value::String(method)) = request.get("method") {
            self.method.push_str(method);
        }
        if let Some(id) = request.get("id") {
            self.has_id = true;
            response::write_node(&mut self.id, id);
        }
        self.request = request;
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The `params` member, borrowed from the request.
    pub fn params(&self) -> Option<&Value> {
        self.request.get("params")
    }

    /// Deserialize `params` into `T`. Absent params deserialize from `null`.
    pub fn parse_params<T>(&self) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
    {
        let params = self.params().unwrap_or(&Value::Null);
        T::deserialize(params).map_err(|err| RpcError::invalid_params(err.to_string()))
    }

    /// Raw JSON of the request `id`, or `None` for a notification.
    pub fn id(&self) -> Option<&[u8]> {
        self.has_id.then_some(self.id.as_slice())
    }

    pub fn is_notification(&self) -> bool {
        !self.has_id
    }

    /// The whole request object.
    pub fn request(&self) -> &Value {
        &self.request
    }

    pub fn arena(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn set_result(&mut self, result: impl Into<Payload>) {
        self.result = Some(result.into());
    }

    /// Store any serializable value; it is encoded when the response is written.
    pub fn encode_result<T>(&mut self, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.result = Some(Payload::encode(value));
    }

    pub fn set_error(&mut self, error: impl Into<ErrorPayload>) {
        self.error = Some(error.into());
    }

    /// Report a plain error. Structured [`RpcError`]s keep their code; anything
    /// else goes out as a server error with its display text as the message.
    pub fn fail<E>(&mut self, err: E)
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.error = Some(ErrorPayload::from_error(err.into()));
    }

    pub fn result(&self) -> Option<&Payload> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    /// Downcast the transport attachment, if the call carried one.
    pub fn transport<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.transport.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) fn attach_transport(&mut self, transport: Option<Attachment>) {
        self.transport = transport;
    }

    pub(crate) fn limit_retained(&mut self, max_retained: usize) {
        self.max_retained = Some(max_retained);
    }

    pub(crate) fn clear_outcome(&mut self) {
        self.result = None;
        self.error = None;
    }

    pub(crate) fn output_mut(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    pub(crate) fn write_fixed(&mut self, body: &[u8]) {
        self.out.extend_from_slice(body);
    }

    /// Serialize the outcome into the output buffer. Notifications write nothing.
    pub(crate) fn write_response(&mut self) {
        if !self.has_id {
            return;
        }
        let id = Some(self.id.as_slice());
        match &self.error {
            Some(error) => response::write_error(&mut self.out, &mut self.scratch, id, error),
            None => response::write_result(&mut self.out, &mut self.scratch, id, self.result.as_ref()),
        }
    }

    /// Move the output into `into` and leave `into`'s empty storage behind.
    pub(crate) fn take_output(&mut self, mut into: Pooled<Buffer>) -> Pooled<Buffer> {
        std::mem::swap(&mut self.out, &mut **into);
        into
    }
}

impl Recycle for RequestContext {
    fn recycle(&mut self) {
        if let Some(Payload::Node(node)) = self.result.take() {
            self.arena.reclaim(node);
        }
        match self.error.take() {
            Some(ErrorPayload::Node(node)) => self.arena.reclaim(node),
            Some(ErrorPayload::Rpc(RpcError {
                data: Some(Payload::Node(node)),
                ..
            })) => self.arena.reclaim(node),
            _ => {}
        }
        let request = std::mem::take(&mut self.request);
        self.arena.reclaim(request);
        self.arena.reset();

        self.method.clear();
        self.id.clear();
        self.has_id = false;
        self.transport = None;

        self.out.clear();
        self.scratch.clear();
        if let Some(max) = self.max_retained {
            self.out.shrink_to(max);
            self.scratch.shrink_to(max);
        }
    }
}
