//! Batch fan-out and fan-in.
//!
//! Every dispatchable item gets its own context and output buffer and runs as
//! one blocking task. All tasks are started before the first one is awaited,
//! and the assembled array keeps the input order.

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::context::{Attachment, RequestContext};
use crate::dispatch::{Response, RpcServer, finish, invoke};
use crate::pool::{Buffer, Pooled};
use crate::registry::Handler;
use crate::response::{self, INVALID_REQUEST_BODY};

/// Largest accepted batch.
pub const MAX_BATCH_LEN: usize = 32;

const DEADLINE_EXCEEDED: &str = "handler deadline exceeded";

enum Slot {
    Ready(Pooled<Buffer>),
    Pending(PendingUnit),
}

struct PendingUnit {
    index: usize,
    /// Raw id kept for failure responses; `None` for notifications.
    id: Option<Vec<u8>>,
    deadline: Option<Instant>,
    handle: JoinHandle<Pooled<Buffer>>,
}

pub(crate) async fn dispatch_batch(server: &RpcServer, items: Vec<Value>, transport: Option<Attachment>) -> Response {
    if items.is_empty() || items.len() > MAX_BATCH_LEN {
        debug!(len = items.len(), "rejected batch length");
        return server.fixed(INVALID_REQUEST_BODY);
    }

    let slots: Vec<Slot> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| start_item(server, index, item, transport.as_ref()))
        .collect();

    let mut outputs = Vec::with_capacity(slots.len());
    for slot in slots {
        let output = match slot {
            Slot::Ready(output) => output,
            Slot::Pending(unit) => join_unit(server, unit).await,
        };
        outputs.push(output);
    }

    let mut body = server.acquire_buffer();
    for output in outputs.iter().filter(|output| !output.is_empty()) {
        let separator = if body.is_empty() { b'[' } else { b',' };
        body.push(separator);
        body.extend_from_slice(output);
    }
    if !body.is_empty() {
        body.push(b']');
    }
    Response::new(body)
}

fn start_item(server: &RpcServer, index: usize, item: Value, transport: Option<&Attachment>) -> Slot {
    let mut ctx = server.acquire_context();
    if !item.is_object() {
        ctx.write_fixed(INVALID_REQUEST_BODY);
        return Slot::Ready(ctx.take_output(server.acquire_buffer()));
    }
    let Some(handler) = server.prepare(&mut ctx, item, None) else {
        return Slot::Ready(ctx.take_output(server.acquire_buffer()));
    };

    ctx.attach_transport(transport.cloned());
    let id = ctx.id().map(<[u8]>::to_vec);
    let deadline = server.batch_item_timeout().map(|timeout| Instant::now() + timeout);
    let output = server.acquire_buffer();
    let handle = tokio::task::spawn_blocking(move || run_unit(ctx, handler, output));

    Slot::Pending(PendingUnit {
        index,
        id,
        deadline,
        handle,
    })
}

fn run_unit(mut ctx: Pooled<RequestContext>, handler: Handler, output: Pooled<Buffer>) -> Pooled<Buffer> {
    invoke(&mut ctx, &handler);
    finish(&mut ctx);
    ctx.take_output(output)
}

async fn join_unit(server: &RpcServer, mut unit: PendingUnit) -> Pooled<Buffer> {
    let joined = match unit.deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, &mut unit.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // The task keeps running detached and releases its context when done.
                warn!(index = unit.index, "batch item exceeded its deadline");
                return failed_unit(server, unit.id.as_deref(), DEADLINE_EXCEEDED);
            }
        },
        None => (&mut unit.handle).await,
    };

    match joined {
        Ok(output) => output,
        Err(err) => {
            error!(index = unit.index, error = %err, "batch unit did not complete");
            failed_unit(server, unit.id.as_deref(), &err.to_string())
        }
    }
}

fn failed_unit(server: &RpcServer, id: Option<&[u8]>, detail: &str) -> Pooled<Buffer> {
    let mut output = server.acquire_buffer();
    if id.is_some() {
        response::write_internal_error(&mut output, id, detail);
    }
    output
}
