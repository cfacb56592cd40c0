//! Error taxonomy.
//!
//! Per-session failures (`ProxyError`) are contained to the session that
//! raised them and mapped to a local response. Lifecycle failures
//! (`LifecycleError`) are returned to the caller of the controller.

use std::io;

use http::StatusCode;
use thiserror::Error;

use crate::hooks::HookError;

/// Malformed HTTP/1.x bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    #[error("invalid header line: {0}")]
    InvalidHeader(String),

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("invalid chunk framing: {0}")]
    InvalidChunk(String),

    #[error("message truncated")]
    Truncated,

    #[error("{0} unexpected bytes after message")]
    TrailingBytes(usize),

    #[error("cannot determine upstream host")]
    MissingHost,
}

/// Content-encoding decode failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported content encoding: {0}")]
    Unsupported(String),

    #[error("corrupt {encoding} body: {source}")]
    Corrupt {
        encoding: String,
        #[source]
        source: io::Error,
    },

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// A failure that aborts a single proxy session.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] ParseError),

    #[error("upstream {upstream} unreachable: {source}")]
    UpstreamUnreachable {
        upstream: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid upstream response: {0}")]
    BadUpstreamResponse(ParseError),

    #[error("hook '{hook}' failed: {source}")]
    HandlerFailure {
        hook: String,
        #[source]
        source: HookError,
    },

    #[error("body exceeds buffering limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("request body exceeds limit of {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("response decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("proxy is shutting down")]
    ShuttingDown,
}

impl ProxyError {
    /// Local status code served to the client, if a response can still be sent.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyError::MalformedMessage(_) => Some(StatusCode::BAD_REQUEST),
            ProxyError::UpstreamUnreachable { .. } => Some(StatusCode::BAD_GATEWAY),
            ProxyError::BadUpstreamResponse(_) => Some(StatusCode::BAD_GATEWAY),
            ProxyError::HandlerFailure { .. } => Some(StatusCode::INTERNAL_SERVER_ERROR),
            ProxyError::BodyTooLarge { .. } => Some(StatusCode::BAD_GATEWAY),
            ProxyError::RequestTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            ProxyError::Decode(_) => Some(StatusCode::BAD_GATEWAY),
            ProxyError::Io(_) | ProxyError::ShuttingDown => None,
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedMessage(_) => "malformed_message",
            ProxyError::UpstreamUnreachable { .. } => "upstream_unreachable",
            ProxyError::BadUpstreamResponse(_) => "bad_upstream_response",
            ProxyError::HandlerFailure { .. } => "handler_failure",
            ProxyError::BodyTooLarge { .. } => "body_too_large",
            ProxyError::RequestTooLarge { .. } => "request_too_large",
            ProxyError::Decode(_) => "decode",
            ProxyError::Io(_) => "io",
            ProxyError::ShuttingDown => "shutting_down",
        }
    }
}

/// Misuse or failure of the proxy lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("proxy is already running")]
    AlreadyRunning,

    #[error("proxy is not running")]
    NotRunning,

    #[error("port {port} is unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}
