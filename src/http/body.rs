//! Message bodies and their framing.
//!
//! # Responsibilities
//! - Hold the entity payload of a buffered message
//! - Remember the original chunked wire bytes until the payload changes
//! - Decide how a message body is delimited on the wire
//!
//! # Design Decisions
//! - `Transfer-Encoding: chunked` wins over `Content-Length`
//! - Responses without either header run until the connection closes
//! - A replaced payload is re-emitted as a single chunk when chunked

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::error::ParseError;
use crate::http::headers::Headers;

/// How a body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body bytes follow the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Body runs until the peer closes the connection.
    UntilClose,
}

impl Framing {
    /// Framing of a request body.
    pub fn for_request(headers: &Headers) -> Result<Self, ParseError> {
        if headers.has_token("transfer-encoding", "chunked") {
            return Ok(Framing::Chunked);
        }
        match content_length(headers)? {
            Some(0) | None => Ok(Framing::Empty),
            Some(n) => Ok(Framing::Length(n)),
        }
    }

    /// Framing of a response body to a request made with `method`.
    pub fn for_response(
        status: StatusCode,
        method: &Method,
        headers: &Headers,
    ) -> Result<Self, ParseError> {
        if *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(Framing::Empty);
        }
        if headers.has_token("transfer-encoding", "chunked") {
            return Ok(Framing::Chunked);
        }
        match content_length(headers)? {
            Some(0) => Ok(Framing::Empty),
            Some(n) => Ok(Framing::Length(n)),
            None => Ok(Framing::UntilClose),
        }
    }
}

fn content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let mut found: Option<u64> = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let part = part.trim();
            let n: u64 = part
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
            match found {
                Some(prev) if prev != n => {
                    return Err(ParseError::InvalidContentLength(value.to_string()))
                }
                _ => found = Some(n),
            }
        }
    }
    Ok(found)
}

/// A fully buffered message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    payload: Bytes,
    /// Original chunked encoding, kept only while `payload` is untouched.
    wire: Option<Bytes>,
    modified: bool,
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A body built from code rather than read off the wire.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            wire: None,
            modified: false,
        }
    }

    pub(crate) fn from_wire(payload: Bytes, wire: Option<Bytes>) -> Self {
        Self {
            payload,
            wire,
            modified: false,
        }
    }

    /// Entity payload with transfer framing removed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Cheap clone of the payload.
    pub fn bytes(&self) -> Bytes {
        self.payload.clone()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True once the payload has been replaced since parsing.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Replace the payload, discarding any original wire framing.
    pub fn replace(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.wire = None;
        self.modified = true;
    }

    /// Write the body as it should appear on the wire.
    pub(crate) fn write_to(&self, chunked: bool, out: &mut Vec<u8>) {
        if let Some(wire) = &self.wire {
            out.extend_from_slice(wire);
        } else if chunked {
            if !self.payload.is_empty() {
                out.extend_from_slice(format!("{:x}\r\n", self.payload.len()).as_bytes());
                out.extend_from_slice(&self.payload);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"0\r\n\r\n");
        } else {
            out.extend_from_slice(&self.payload);
        }
    }
}

/// Split a complete body off the front of `input` according to `framing`.
///
/// Returns the body and the number of bytes consumed.
pub(crate) fn split_body(framing: Framing, input: &[u8]) -> Result<(Body, usize), ParseError> {
    match framing {
        Framing::Empty => Ok((Body::empty(), 0)),
        Framing::Length(n) => {
            let n = usize::try_from(n).map_err(|_| ParseError::Truncated)?;
            if input.len() < n {
                return Err(ParseError::Truncated);
            }
            Ok((Body::from_wire(Bytes::copy_from_slice(&input[..n]), None), n))
        }
        Framing::UntilClose => Ok((
            Body::from_wire(Bytes::copy_from_slice(input), None),
            input.len(),
        )),
        Framing::Chunked => split_chunked(input),
    }
}

fn split_chunked(input: &[u8]) -> Result<(Body, usize), ParseError> {
    let mut payload = Vec::new();
    let mut pos = 0;
    loop {
        let line = take_line(input, &mut pos)?;
        let size = parse_chunk_size(line)?;
        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let trailer = take_line(input, &mut pos)?;
                if trailer.is_empty() {
                    break;
                }
            }
            let wire = Bytes::copy_from_slice(&input[..pos]);
            return Ok((Body::from_wire(Bytes::from(payload), Some(wire)), pos));
        }
        let end = pos
            .checked_add(size)
            .and_then(|end| end.checked_add(2))
            .ok_or_else(|| ParseError::InvalidChunk(format!("chunk size {size:#x} out of range")))?;
        if input.len() < end {
            return Err(ParseError::Truncated);
        }
        payload.extend_from_slice(&input[pos..end - 2]);
        if &input[end - 2..end] != b"\r\n" {
            return Err(ParseError::InvalidChunk("missing CRLF after chunk data".into()));
        }
        pos = end;
    }
}

fn take_line<'a>(input: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ParseError> {
    let rest = &input[*pos..];
    let end = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ParseError::Truncated)?;
    *pos += end + 2;
    Ok(&rest[..end])
}

/// Parse a chunk-size line, ignoring chunk extensions.
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::InvalidChunk("non-ASCII chunk size".into()))?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| ParseError::InvalidChunk(format!("bad chunk size '{}'", digits)))
}
