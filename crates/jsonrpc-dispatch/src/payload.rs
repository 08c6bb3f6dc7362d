//! Result and error slot values.
//!
//! A handler hands its outcome to the serializer in one of three encodings:
//! a pre-built [`Value`] node, raw bytes that are already valid JSON, or an
//! arbitrary [`Serialize`] value that is encoded lazily at write time.

use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::ser::{self, Error as _};
use serde_json::Value;

use crate::error::RpcError;

type EncodeFn = dyn Fn(&mut Vec<u8>) -> serde_json::Result<()> + Send + Sync;

/// Deferred `serde_json` encoding of a value captured at `set_result` time.
pub struct Encoder(Box<EncodeFn>);

impl Encoder {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self(Box::new(move |out: &mut Vec<u8>| {
            value.serialize(FiniteFloats)?;
            serde_json::to_writer(out, &value)
        }))
    }

    /// Append the JSON encoding to `out`. On failure `out` may hold a partial
    /// encoding; callers encode into scratch space.
    pub fn encode(&self, out: &mut Vec<u8>) -> serde_json::Result<()> {
        (self.0)(out)
    }
}

/// Walks a value and fails on NaN or infinite floats, which `serde_json`
/// would otherwise write as `null`.
struct FiniteFloats;

fn check_finite(finite: bool) -> serde_json::Result<()> {
    if finite {
        Ok(())
    } else {
        Err(serde_json::Error::custom("non-finite float cannot be encoded as JSON"))
    }
}

macro_rules! accept_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> serde_json::Result<()> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_f32(self, v: f32) -> serde_json::Result<()> {
        check_finite(v.is_finite())
    }

    fn serialize_f64(self, v: f64) -> serde_json::Result<()> {
        check_finite(v.is_finite())
    }

    fn serialize_none(self) -> serde_json::Result<()> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> serde_json::Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> serde_json::Result<()> {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> serde_json::Result<()> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> serde_json::Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> serde_json::Result<()> {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> serde_json::Result<Self> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> serde_json::Result<Self> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> serde_json::Result<()> {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> serde_json::Result<()> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> serde_json::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Encoder(..)")
    }
}

/// A result (or error `data`) value.
#[derive(Debug)]
pub enum Payload {
    /// Pre-built JSON node, written with its own serializer.
    Node(Value),
    /// Pre-encoded JSON, written verbatim.
    Raw(Bytes),
    /// Arbitrary value run through the generic encoder.
    Encode(Encoder),
}

impl Payload {
    pub fn node(value: Value) -> Self {
        Payload::Node(value)
    }

    /// Raw JSON bytes. The bytes are not validated.
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Payload::Raw(bytes.into())
    }

    pub fn encode<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Payload::Encode(Encoder::new(value))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Node(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Payload::Raw(Bytes::from_static(bytes))
    }
}

/// What a handler may place in the error slot.
#[derive(Debug)]
pub enum ErrorPayload {
    /// Structured `{code, message, data?}`.
    Rpc(RpcError),
    /// Any other error; reported with [`crate::error_codes::SERVER_ERROR`] and
    /// its `Display` text as the message.
    Failure(Box<dyn StdError + Send + Sync>),
    /// Complete error object, written as the `error` member.
    Node(Value),
    /// Complete pre-encoded error object, written verbatim as the `error` member.
    Raw(Bytes),
}

impl ErrorPayload {
    /// Wrap an arbitrary error, unwrapping it to [`ErrorPayload::Rpc`] when it
    /// is an [`RpcError`] underneath.
    pub fn from_error(err: Box<dyn StdError + Send + Sync>) -> Self {
        match err.downcast::<RpcError>() {
            Ok(rpc) => ErrorPayload::Rpc(*rpc),
            Err(other) => ErrorPayload::Failure(other),
        }
    }
}

impl From<RpcError> for ErrorPayload {
    fn from(err: RpcError) -> Self {
        ErrorPayload::Rpc(err)
    }
}

impl From<Box<dyn StdError + Send + Sync>> for ErrorPayload {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        ErrorPayload::from_error(err)
    }
}

impl From<Value> for ErrorPayload {
    fn from(value: Value) -> Self {
        ErrorPayload::Node(value)
    }
}

impl From<Bytes> for ErrorPayload {
    fn from(bytes: Bytes) -> Self {
        ErrorPayload::Raw(bytes)
    }
}

impl From<Vec<u8>> for ErrorPayload {
    fn from(bytes: Vec<u8>) -> Self {
        ErrorPayload::Raw(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for ErrorPayload {
    fn from(bytes: &'static [u8]) -> Self {
        ErrorPayload::Raw(Bytes::from_static(bytes))
    }
}
