//! Phase-scoped views handed to hooks.
//!
//! A context borrows the session (and, for the response phase, the
//! response) mutably for exactly one handler call. The borrow checker
//! therefore guarantees that no hook keeps a reference once its phase ends.

use std::borrow::Cow;
use std::net::SocketAddr;

use crate::hooks::hook::HookError;
use crate::http::{Request, Response};
use crate::proxy::session::{Session, SessionId};

/// View of a session during the before-request phase.
pub struct RequestContext<'a> {
    session: &'a mut Session,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.session.client_addr()
    }

    /// Full URL of the request as received.
    pub fn url(&self) -> &str {
        self.session.url()
    }

    pub fn request(&self) -> &Request {
        self.session.request()
    }

    pub fn request_mut(&mut self) -> &mut Request {
        self.session.request_mut()
    }

    /// Ask the engine to buffer the response so before-response hooks run.
    pub fn set_buffer_response(&mut self, buffer: bool) {
        self.session.flags_mut().buffer_response = buffer;
    }

    pub fn buffer_response(&self) -> bool {
        self.session.flags().buffer_response
    }

    /// Ask for the response body to be decoded before the response phase.
    /// Implies buffering.
    pub fn set_decode_response(&mut self, decode: bool) {
        let flags = self.session.flags_mut();
        flags.decode_response = decode;
        if decode {
            flags.buffer_response = true;
        }
    }

    /// Forward to `host:port` instead of the host named by the request.
    pub fn set_upstream(&mut self, host: impl Into<String>, port: u16) {
        self.session.set_upstream(host.into(), port);
    }
}

/// View of a session during the before-response phase.
pub struct ResponseContext<'a> {
    session: &'a mut Session,
    response: &'a mut Response,
}

impl<'a> ResponseContext<'a> {
    pub(crate) fn new(session: &'a mut Session, response: &'a mut Response) -> Self {
        Self { session, response }
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn url(&self) -> &str {
        self.session.url()
    }

    /// The request as it was forwarded. Frozen in this phase.
    pub fn request(&self) -> &Request {
        self.session.request()
    }

    pub fn response(&self) -> &Response {
        self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        self.response
    }

    /// Response body with `Content-Encoding` removed.
    ///
    /// Decoding happens at most once per session; later calls, from this
    /// or any other hook, return the already decoded body. Fails with
    /// `DecodeError::TooLarge` past the configured body limit.
    pub fn decoded_body(&mut self) -> Result<&[u8], HookError> {
        if !self.session.response_decoded() && !self.response.body().is_empty() {
            self.response.decode_body(self.session.body_limit())?;
            self.session.mark_response_decoded();
        }
        Ok(self.response.body().as_bytes())
    }

    /// Decoded body as text, replacing invalid UTF-8 sequences.
    pub fn decoded_text(&mut self) -> Result<Cow<'_, str>, HookError> {
        self.decoded_body().map(String::from_utf8_lossy)
    }

    /// Replace the first occurrence of `needle` in the decoded body.
    ///
    /// Returns false (and leaves the body untouched) if `needle` is absent.
    pub fn replace_once(&mut self, needle: &[u8], replacement: &[u8]) -> Result<bool, HookError> {
        if needle.is_empty() {
            return Ok(false);
        }
        let body = self.decoded_body()?;
        let Some(at) = body.windows(needle.len()).position(|w| w == needle) else {
            return Ok(false);
        };
        let mut rewritten = Vec::with_capacity(body.len() - needle.len() + replacement.len());
        rewritten.extend_from_slice(&body[..at]);
        rewritten.extend_from_slice(replacement);
        rewritten.extend_from_slice(&body[at + needle.len()..]);
        self.response.set_body(rewritten);
        Ok(true)
    }
}
