//! Scratch node factory for handler-built results.
//!
//! `serde_json::Value` trees own their storage, so the arena cannot hand out
//! borrowed nodes. Instead it keeps free lists of string and array buffers and
//! builds new nodes on top of them. Trees that come back through
//! [`Arena::reclaim`] (finished results, parsed requests) refill the lists, and
//! [`Arena::reset`] drops everything past the retention limits in one step.

use serde_json::{Map, Number, Value};

const MAX_FREE_STRINGS: usize = 256;
const MAX_FREE_ARRAYS: usize = 64;
const MAX_RETAINED_STRING: usize = 4 * 1024;
const MAX_RETAINED_ARRAY: usize = 1024;

#[derive(Debug, Default)]
pub struct Arena {
    strings: Vec<String>,
    arrays: Vec<Vec<Value>>,
    stack: Vec<Value>,
    allocated: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes handed out since the last [`Arena::reset`].
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn new_string(&mut self, s: &str) -> Value {
        self.allocated += 1;
        let mut buf = self.strings.pop().unwrap_or_default();
        buf.push_str(s);
        Value::String(buf)
    }

    pub fn new_number_i64(&mut self, n: i64) -> Value {
        self.allocated += 1;
        Value::Number(Number::from(n))
    }

    pub fn new_number_u64(&mut self, n: u64) -> Value {
        self.allocated += 1;
        Value::Number(Number::from(n))
    }

    /// `None` for NaN and infinities, which have no JSON encoding.
    pub fn new_number_f64(&mut self, n: f64) -> Option<Value> {
        let number = Number::from_f64(n)?;
        self.allocated += 1;
        Some(Value::Number(number))
    }

    pub fn new_bool(&mut self, b: bool) -> Value {
        self.allocated += 1;
        Value::Bool(b)
    }

    pub fn new_null(&mut self) -> Value {
        self.allocated += 1;
        Value::Null
    }

    /// Empty array, backed by a recycled buffer when one is available.
    pub fn new_array(&mut self) -> Value {
        self.allocated += 1;
        Value::Array(self.arrays.pop().unwrap_or_default())
    }

    pub fn new_object(&mut self) -> Value {
        self.allocated += 1;
        Value::Object(Map::new())
    }

    /// Take a finished tree apart and keep its string and array buffers.
    pub fn reclaim(&mut self, node: Value) {
        self.stack.push(node);
        while let Some(node) = self.stack.pop() {
            match node {
                Value::String(s) => self.keep_string(s),
                Value::Array(mut items) => {
                    self.stack.extend(items.drain(..));
                    if items.capacity() <= MAX_RETAINED_ARRAY && self.arrays.len() < MAX_FREE_ARRAYS {
                        self.arrays.push(items);
                    }
                }
                Value::Object(map) => {
                    for (key, value) in map {
                        self.keep_string(key);
                        self.stack.push(value);
                    }
                }
                Value::Null | Value::Bool(_) | Value::Number(_) => {}
            }
        }
    }

    /// Bulk reset between requests.
    pub fn reset(&mut self) {
        self.allocated = 0;
        self.stack.clear();
        self.strings.truncate(MAX_FREE_STRINGS);
        self.arrays.truncate(MAX_FREE_ARRAYS);
    }

    fn keep_string(&mut self, mut s: String) {
        if s.capacity() == 0 || s.capacity() > MAX_RETAINED_STRING || self.strings.len() >= MAX_FREE_STRINGS {
            return;
        }
        s.clear();
        self.strings.push(s);
    }
}
