//! Protocol-exact response encoding.
//!
//! Envelopes are written by hand so key order is fixed and the `id` member can
//! be left out entirely:
//!
//! ```text
//! {"jsonrpc":"2.0","result":<R>,"id":<I>}
//! {"jsonrpc":"2.0","error":{"code":<C>,"message":<M>[,"data":<D>]},"id":<I>}
//! ```

use std::io::Write;

use serde_json::Value;

use crate::error_codes;
use crate::payload::{ErrorPayload, Payload};

pub const PARSE_ERROR_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}"#;
pub const INVALID_REQUEST_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"},"id":null}"#;
pub const INTERNAL_ERROR_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#;

const RESULT_OPEN: &[u8] = br#"{"jsonrpc":"2.0","result":"#;
const ERROR_OPEN: &[u8] = br#"{"jsonrpc":"2.0","error":"#;

/// Write a success response. A missing result is written as `null`.
///
/// `scratch` receives the encoding of [`Payload::Encode`] values before any
/// byte reaches `out`; if that encoding fails, an Internal error carrying the
/// failure text is written instead.
pub fn write_result(out: &mut Vec<u8>, scratch: &mut Vec<u8>, id: Option<&[u8]>, result: Option<&Payload>) {
    match result {
        None => write_raw_result(out, id, b"null"),
        Some(Payload::Raw(bytes)) if bytes.is_empty() => write_raw_result(out, id, b"null"),
        Some(Payload::Raw(bytes)) => write_raw_result(out, id, bytes),
        Some(Payload::Node(node)) => {
            out.extend_from_slice(RESULT_OPEN);
            write_node(out, node);
            close_envelope(out, id);
        }
        Some(Payload::Encode(encoder)) => {
            scratch.clear();
            match encoder.encode(scratch) {
                Ok(()) => write_raw_result(out, id, scratch),
                Err(err) => write_internal_error(out, id, &err.to_string()),
            }
        }
    }
}

/// Write an error response for whatever the handler put in the error slot.
pub fn write_error(out: &mut Vec<u8>, scratch: &mut Vec<u8>, id: Option<&[u8]>, error: &ErrorPayload) {
    match error {
        ErrorPayload::Rpc(err) => {
            write_error_object(out, scratch, id, err.code, &err.message, err.data.as_ref());
        }
        ErrorPayload::Failure(err) => {
            write_error_object(out, scratch, id, error_codes::SERVER_ERROR, &err.to_string(), None);
        }
        ErrorPayload::Node(node) => {
            out.extend_from_slice(ERROR_OPEN);
            write_node(out, node);
            close_envelope(out, id);
        }
        ErrorPayload::Raw(bytes) => {
            out.extend_from_slice(ERROR_OPEN);
            if bytes.is_empty() {
                out.extend_from_slice(b"null");
            } else {
                out.extend_from_slice(bytes);
            }
            close_envelope(out, id);
        }
    }
}

/// `{"code":-32603,"message":"Internal error","data":<detail>}` for the given id.
pub fn write_internal_error(out: &mut Vec<u8>, id: Option<&[u8]>, detail: &str) {
    out.extend_from_slice(br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error","data":"#);
    write_str(out, detail);
    out.push(b'}');
    close_envelope(out, id);
}

fn write_error_object(
    out: &mut Vec<u8>,
    scratch: &mut Vec<u8>,
    id: Option<&[u8]>,
    code: i64,
    message: &str,
    data: Option<&Payload>,
) {
    scratch.clear();
    match data {
        None => {}
        Some(Payload::Node(node)) => write_node(scratch, node),
        Some(Payload::Raw(bytes)) => scratch.extend_from_slice(bytes),
        Some(Payload::Encode(encoder)) => {
            if let Err(err) = encoder.encode(scratch) {
                write_internal_error(out, id, &err.to_string());
                return;
            }
        }
    }

    out.extend_from_slice(br#"{"jsonrpc":"2.0","error":{"code":"#);
    // Writes into a Vec cannot fail.
    let _ = write!(out, "{code}");
    out.extend_from_slice(br#","message":"#);
    write_str(out, message);
    if !scratch.is_empty() {
        out.extend_from_slice(br#","data":"#);
        out.extend_from_slice(scratch);
    }
    out.push(b'}');
    close_envelope(out, id);
}

fn write_raw_result(out: &mut Vec<u8>, id: Option<&[u8]>, result: &[u8]) {
    out.extend_from_slice(RESULT_OPEN);
    out.extend_from_slice(result);
    close_envelope(out, id);
}

fn close_envelope(out: &mut Vec<u8>, id: Option<&[u8]>) {
    if let Some(id) = id {
        out.extend_from_slice(br#","id":"#);
        out.extend_from_slice(id);
    }
    out.push(b'}');
}

pub(crate) fn write_node(out: &mut Vec<u8>, node: &Value) {
    // A `Value` always serializes and writes into a Vec cannot fail.
    let _ = serde_json::to_writer(out, node);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    let _ = serde_json::to_writer(out, s);
}
