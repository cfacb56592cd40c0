//! Upstream and synthetic responses.
//!
//! # Responsibilities
//! - Parse a status line, headers and body off the wire
//! - Build synthetic responses for hooks and local error responses
//! - Decode `Content-Encoding` in place for hooks that rewrite bodies
//! - Serialize the (possibly rewritten) response for the client
//!
//! # Design Decisions
//! - The reason phrase is kept verbatim, including when it is absent
//! - A response whose body was not buffered carries an empty body and
//!   `is_buffered() == false`; it is streamed, never rewritten

use std::borrow::Cow;

use bytes::Bytes;
use http::{Method, StatusCode, Version};

use crate::error::{DecodeError, ParseError};
use crate::http::body::{split_body, Body, Framing};
use crate::http::encoding;
use crate::http::head::{
    find_head_end, parse_head, terminated, version_from_minor, version_str, write_message,
};
use crate::http::headers::Headers;

/// An HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    version: Version,
    status: StatusCode,
    /// `None` when the status line had no reason phrase at all.
    reason: Option<String>,
    headers: Headers,
    body: Body,
    buffered: bool,
}

impl Response {
    /// Create an HTTP/1.1 response with the canonical reason phrase.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: Some(canonical_reason(status)),
            headers: Headers::new(),
            body: Body::empty(),
            buffered: true,
        }
    }

    /// A complete response supplied by a hook instead of the upstream.
    pub fn synthetic(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let mut response = Self::new(status);
        response.headers.set("Content-Type", content_type);
        response.headers.set("Content-Length", body.len().to_string());
        response.body = Body::new(body);
        response
    }

    /// A body-less redirect to `location`.
    pub fn redirect(status: StatusCode, location: &str) -> Self {
        let mut response = Self::new(status);
        response.headers.set("Location", location);
        response.headers.set("Content-Length", "0");
        response
    }

    /// A plain-text error generated by the proxy itself.
    pub fn local_error(status: StatusCode, message: &str) -> Self {
        let mut response = Self::synthetic(status, "text/plain; charset=utf-8", message.to_string());
        response.headers.set("Connection", "close");
        response
    }

    /// Parse a complete response to a non-`HEAD` request.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse_for(bytes, &Method::GET)
    }

    /// Parse a complete response to a request made with `method`.
    pub fn parse_for(bytes: &[u8], method: &Method) -> Result<Self, ParseError> {
        let head_end = find_head_end(bytes).ok_or(ParseError::Truncated)?;
        let mut response = Self::from_head(&bytes[..head_end])?;
        let (body, used) = split_body(response.framing_for(method)?, &bytes[head_end..])?;
        let rest = bytes.len() - head_end - used;
        if rest > 0 {
            return Err(ParseError::TrailingBytes(rest));
        }
        response.body = body;
        response.buffered = true;
        Ok(response)
    }

    /// Parse a response head (ending in `CRLFCRLF`); the body is not buffered.
    pub(crate) fn from_head(head: &[u8]) -> Result<Self, ParseError> {
        let (start_line, headers) = parse_head(head)?;
        let start_line = std::str::from_utf8(start_line)
            .map_err(|_| ParseError::InvalidStartLine("non-UTF-8 status line".into()))?;
        let invalid = || ParseError::InvalidStartLine(start_line.to_string());

        let line = terminated(start_line.as_bytes());
        let mut no_fields: [httparse::Header<'_>; 0] = [];
        let mut parsed = httparse::Response::new(&mut no_fields);
        match parsed.parse(&line) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) | Err(_) => return Err(invalid()),
        }
        let (Some(minor), Some(code)) = (parsed.version, parsed.code) else {
            return Err(invalid());
        };
        let status = StatusCode::from_u16(code).map_err(|_| invalid())?;
        // Kept verbatim so "HTTP/1.1 204" and "HTTP/1.1 204 " round-trip.
        let reason = start_line.splitn(3, ' ').nth(2).map(str::to_string);

        Ok(Self {
            version: version_from_minor(minor)?,
            status,
            reason,
            headers,
            body: Body::empty(),
            buffered: false,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Change the status; the reason phrase becomes the canonical one.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.reason = Some(canonical_reason(status));
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replace the body. `Content-Length` is fixed up on serialization.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body.replace(body);
    }

    pub(crate) fn set_wire_body(&mut self, body: Body) {
        self.body = body;
        self.buffered = true;
    }

    /// False when the body was streamed straight to the client.
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.body.as_bytes())
    }

    pub fn set_body_text(&mut self, text: impl Into<String>) {
        self.set_body(text.into());
    }

    /// Body framing for a response to `method`.
    pub fn framing_for(&self, method: &Method) -> Result<Framing, ParseError> {
        Framing::for_response(self.status, method, &self.headers)
    }

    /// Remove `Content-Encoding` by decoding the body in place, refusing
    /// output larger than `limit` bytes.
    ///
    /// Returns false if the body was not encoded. An empty body (HEAD, 204,
    /// 304) is left as is, headers included.
    pub fn decode_body(&mut self, limit: usize) -> Result<bool, DecodeError> {
        if self.body.is_empty() {
            return Ok(false);
        }
        let Some(encoding) = self.headers.combined("content-encoding") else {
            return Ok(false);
        };
        let decoded = encoding::decode(&encoding, self.body.as_bytes(), limit)?;
        self.headers.remove("content-encoding");
        self.body.replace(decoded);
        Ok(true)
    }

    /// True for `101 Switching Protocols`.
    pub fn is_upgrade(&self) -> bool {
        self.status == StatusCode::SWITCHING_PROTOCOLS
    }

    /// True if the connection cannot be reused after this response.
    pub fn closes_connection(&self, method: &Method) -> bool {
        self.headers.has_token("connection", "close")
            || (self.version == Version::HTTP_10 && !self.headers.has_token("connection", "keep-alive"))
            || matches!(self.framing_for(method), Ok(Framing::UntilClose) | Err(_))
    }

    fn start_line(&self) -> String {
        match &self.reason {
            Some(reason) => format!(
                "{} {} {}",
                version_str(self.version),
                self.status.as_str(),
                reason
            ),
            None => format!("{} {}", version_str(self.version), self.status.as_str()),
        }
    }

    /// Serialize the status line and headers only.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.start_line().as_bytes());
        out.extend_from_slice(b"\r\n");
        self.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Serialize the full response for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        write_message(&self.start_line(), &self.headers, &self.body, &mut out);
        out
    }
}

fn canonical_reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_string()
}
