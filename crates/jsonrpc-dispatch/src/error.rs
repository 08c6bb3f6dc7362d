use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::error_codes;
use crate::payload::Payload;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }

    /// Map a raw code back onto the taxonomy. Codes outside the reserved
    /// ranges are reported as `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            error_codes::PARSE_ERROR => Some(JsonRpcErrorCode::ParseError),
            error_codes::INVALID_REQUEST => Some(JsonRpcErrorCode::InvalidRequest),
            error_codes::METHOD_NOT_FOUND => Some(JsonRpcErrorCode::MethodNotFound),
            error_codes::INVALID_PARAMS => Some(JsonRpcErrorCode::InvalidParams),
            error_codes::INTERNAL_ERROR => Some(JsonRpcErrorCode::InternalError),
            c if (error_codes::SERVER_ERROR_START..=error_codes::SERVER_ERROR_END).contains(&c) => {
                Some(JsonRpcErrorCode::ServerError(c))
            }
            _ => None,
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// A structured JSON-RPC error: `{code, message, data?}`.
///
/// This is the canonical shape for handler-declared errors. `data` carries the
/// same tri-state payload as a result, so it can be a pre-built node, raw JSON
/// bytes, or any serializable value.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: Cow<'static, str>,
    pub data: Option<Payload>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn from_code(code: JsonRpcErrorCode) -> Self {
        Self::new(code.code(), code.message())
    }

    pub fn with_data(mut self, data: impl Into<Payload>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error() -> Self {
        Self::from_code(JsonRpcErrorCode::ParseError)
    }

    pub fn invalid_request() -> Self {
        Self::from_code(JsonRpcErrorCode::InvalidRequest)
    }

    pub fn method_not_found() -> Self {
        Self::from_code(JsonRpcErrorCode::MethodNotFound)
    }

    pub fn invalid_params(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    pub fn internal_error() -> Self {
        Self::from_code(JsonRpcErrorCode::InternalError)
    }

    /// Server error in the reserved `-32099..=-32000` range. Codes outside the
    /// range are clamped to [`error_codes::SERVER_ERROR`].
    pub fn server_error(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        let code = if (error_codes::SERVER_ERROR_START..=error_codes::SERVER_ERROR_END).contains(&code) {
            code
        } else {
            error_codes::SERVER_ERROR
        };
        Self::new(code, message)
    }
}

/// Errors returned while installing handlers into a [`crate::MethodRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no service name for type {0}")]
    NoServiceName(String),

    #[error("type {0} is not exported")]
    ServiceNotExported(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),
}
