//! Intercepted client requests.
//!
//! # Responsibilities
//! - Parse a request head and body off the wire
//! - Resolve the upstream authority (absolute-form, authority-form or `Host`)
//! - Serialize the request for forwarding, byte-exact when untouched
//!
//! # Design Decisions
//! - The request target is kept verbatim; absolute-form stays absolute-form
//! - Method tokens are preserved exactly, including extension methods
//! - Mutation is only reachable through `&mut Request`, which hooks receive
//!   for the duration of the before-request phase

use bytes::Bytes;
use http::{Method, Version};
use url::Url;

use crate::error::ParseError;
use crate::http::body::{split_body, Body, Framing};
use crate::http::head::{
    find_head_end, parse_head, terminated, version_from_minor, version_str, write_message,
};
use crate::http::headers::Headers;

/// An HTTP/1.x request as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Body,
}

impl Request {
    /// Create an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    /// Parse a complete request (head and body).
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let head_end = find_head_end(bytes).ok_or(ParseError::Truncated)?;
        let mut request = Self::from_head(&bytes[..head_end])?;
        let (body, used) = split_body(request.framing()?, &bytes[head_end..])?;
        let rest = bytes.len() - head_end - used;
        if rest > 0 {
            return Err(ParseError::TrailingBytes(rest));
        }
        request.body = body;
        Ok(request)
    }

    /// Parse a request head (ending in `CRLFCRLF`); the body is left empty.
    pub(crate) fn from_head(head: &[u8]) -> Result<Self, ParseError> {
        let (start_line, headers) = parse_head(head)?;
        let invalid = || ParseError::InvalidStartLine(String::from_utf8_lossy(start_line).into_owned());

        let line = terminated(start_line);
        let mut no_fields: [httparse::Header<'_>; 0] = [];
        let mut parsed = httparse::Request::new(&mut no_fields);
        match parsed.parse(&line) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) | Err(_) => return Err(invalid()),
        }
        let (Some(method), Some(target), Some(minor)) = (parsed.method, parsed.path, parsed.version) else {
            return Err(invalid());
        };
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| invalid())?;

        Ok(Self {
            method,
            target: target.to_string(),
            version: version_from_minor(minor)?,
            headers,
            body: Body::empty(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target exactly as sent by the client.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Rewrite the request target (path or absolute URL).
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
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
    }

    /// Body framing declared by the headers.
    pub fn framing(&self) -> Result<Framing, ParseError> {
        Framing::for_request(&self.headers)
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// Full URL of the request.
    ///
    /// Absolute-form and authority-form targets are returned as sent;
    /// origin-form targets are joined with the `Host` header.
    pub fn full_url(&self) -> String {
        if self.is_connect() || self.target.contains("://") {
            return self.target.clone();
        }
        match self.headers.get("host") {
            Some(host) => format!("http://{}{}", host, self.target),
            None => self.target.clone(),
        }
    }

    /// Host and port the request is addressed to.
    pub fn authority(&self) -> Result<(String, u16), ParseError> {
        if self.is_connect() {
            return split_authority(&self.target, 443);
        }
        if self.target.contains("://") {
            let url = Url::parse(&self.target).map_err(|_| ParseError::MissingHost)?;
            let host = url.host_str().ok_or(ParseError::MissingHost)?;
            let port = url.port_or_known_default().unwrap_or(80);
            return Ok((trim_brackets(host), port));
        }
        let host = self.headers.get("host").ok_or(ParseError::MissingHost)?;
        split_authority(host, 80)
    }

    /// True if the client asked for the connection to close afterwards.
    pub fn wants_close(&self) -> bool {
        if self.headers.has_token("connection", "close")
            || self.headers.has_token("proxy-connection", "close")
        {
            return true;
        }
        self.version == Version::HTTP_10
            && !self.headers.has_token("connection", "keep-alive")
            && !self.headers.has_token("proxy-connection", "keep-alive")
    }

    /// Serialize the request for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let start_line = format!(
            "{} {} {}",
            self.method.as_str(),
            self.target,
            version_str(self.version)
        );
        let mut out = Vec::with_capacity(256 + self.body.len());
        write_message(&start_line, &self.headers, &self.body, &mut out);
        out
    }
}

fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16), ParseError> {
    let url = Url::parse(&format!("http://{}", authority)).map_err(|_| ParseError::MissingHost)?;
    let host = url.host_str().ok_or(ParseError::MissingHost)?;
    if host.is_empty() {
        return Err(ParseError::MissingHost);
    }
    // `Url` drops the port when it equals the scheme default.
    let port = url.port().unwrap_or_else(|| {
        if authority.ends_with(":80") {
            80
        } else {
            default_port
        }
    });
    Ok((trim_brackets(host), port))
}

fn trim_brackets(host: &str) -> String {
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}
