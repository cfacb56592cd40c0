//! Per-transaction session state.
//!
//! # Responsibilities
//! - Correlate one request with its response under a unique identifier
//! - Carry the flags hooks set (buffering, decoding, upstream override)
//! - Remember whether the response body was already decoded
//!
//! # Design Decisions
//! - A session is owned by the task serving its connection and is never
//!   shared, so it needs no locking
//! - Hooks reach it only through phase-scoped contexts

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::config::LimitsConfig;
use crate::error::ParseError;
use crate::http::Request;

/// Only uniqueness is needed, so relaxed ordering is enough.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Flags hooks may set during the before-request phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Buffer the whole response so before-response hooks can rewrite it.
    pub buffer_response: bool,
    /// Decode `Content-Encoding` before the before-response phase.
    pub decode_response: bool,
}

/// One request/response transaction.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    client_addr: SocketAddr,
    started_at: SystemTime,
    started: Instant,
    url: String,
    request: Request,
    flags: SessionFlags,
    upstream_override: Option<(String, u16)>,
    response_decoded: bool,
    /// Largest decoded response body hooks may materialize.
    body_limit: usize,
}

impl Session {
    pub fn new(client_addr: SocketAddr, request: Request) -> Self {
        Self {
            id: SessionId::new(),
            client_addr,
            started_at: SystemTime::now(),
            started: Instant::now(),
            url: request.full_url(),
            request,
            flags: SessionFlags::default(),
            upstream_override: None,
            response_decoded: false,
            body_limit: LimitsConfig::default().max_body_bytes,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Wall-clock time the request head was parsed.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Full URL of the request as it arrived, before any hook ran.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut SessionFlags {
        &mut self.flags
    }

    pub(crate) fn set_upstream(&mut self, host: String, port: u16) {
        self.upstream_override = Some((host, port));
    }

    /// Host and port to forward to: a hook override, else the request's own.
    pub fn upstream(&self) -> Result<(String, u16), ParseError> {
        match &self.upstream_override {
            Some((host, port)) => Ok((host.clone(), *port)),
            None => self.request.authority(),
        }
    }

    pub(crate) fn response_decoded(&self) -> bool {
        self.response_decoded
    }

    pub(crate) fn mark_response_decoded(&mut self) {
        self.response_decoded = true;
    }

    pub(crate) fn body_limit(&self) -> usize {
        self.body_limit
    }

    pub(crate) fn set_body_limit(&mut self, limit: usize) {
        self.body_limit = limit;
    }
}
