//! Message head parsing and serialization shared by requests and responses.

use http::Version;

use crate::error::ParseError;
use crate::http::body::Body;
use crate::http::headers::{HeaderField, Headers};

/// Index just past the `CRLFCRLF` that ends the head, if present.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Header fields accepted in one head.
pub(crate) const MAX_HEADERS: usize = 128;

/// Split a complete head into its start line and header fields.
///
/// Lines must be CRLF-terminated. Field tokenizing is done by `httparse`;
/// each field keeps the raw line it was parsed from.
pub(crate) fn parse_head(head: &[u8]) -> Result<(&[u8], Headers), ParseError> {
    let body = head
        .strip_suffix(b"\r\n\r\n")
        .ok_or(ParseError::Truncated)?;

    let mut lines = crlf_lines(body).into_iter();
    let start_line = lines
        .next()
        .filter(|l| is_clean(l))
        .ok_or_else(|| ParseError::InvalidStartLine("stray CR or LF".into()))?;
    let raw: Vec<&[u8]> = lines.collect();
    if raw.iter().any(|l| !is_clean(l)) {
        return Err(ParseError::InvalidHeader("stray CR or LF".into()));
    }

    let block = &head[start_line.len() + 2..];
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let fields = match httparse::parse_headers(block, &mut slots) {
        Ok(httparse::Status::Complete((_, fields))) => fields,
        Ok(httparse::Status::Partial) => return Err(ParseError::Truncated),
        Err(err) => return Err(ParseError::InvalidHeader(err.to_string())),
    };
    if fields.len() != raw.len() {
        return Err(ParseError::InvalidHeader("field count does not match line count".into()));
    }

    let mut headers = Headers::new();
    for (field, line) in fields.iter().zip(raw) {
        headers.push_field(HeaderField::from_wire(field, line));
    }
    Ok((start_line, headers))
}

/// A start line followed by an empty field section, ready for `httparse`.
pub(crate) fn terminated(start_line: &[u8]) -> Vec<u8> {
    [start_line, &b"\r\n\r\n"[..]].concat()
}

fn crlf_lines(mut rest: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    while let Some(i) = rest.windows(2).position(|w| w == b"\r\n") {
        lines.push(&rest[..i]);
        rest = &rest[i + 2..];
    }
    lines.push(rest);
    lines
}

fn is_clean(line: &[u8]) -> bool {
    !line.iter().any(|b| *b == b'\r' || *b == b'\n')
}

/// Version from the minor digit `httparse` reports for `HTTP/1.x`.
pub(crate) fn version_from_minor(minor: u8) -> Result<Version, ParseError> {
    match minor {
        0 => Ok(Version::HTTP_10),
        1 => Ok(Version::HTTP_11),
        other => Err(ParseError::InvalidStartLine(format!(
            "unsupported version 'HTTP/1.{}'",
            other
        ))),
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// Serialize a full message.
///
/// A body replaced since parsing gets framing headers that match it: a
/// single chunk when chunked, otherwise an exact `Content-Length`.
pub(crate) fn write_message(
    start_line: &str,
    headers: &Headers,
    body: &Body,
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(start_line.as_bytes());
    out.extend_from_slice(b"\r\n");

    let chunked = headers.has_token("transfer-encoding", "chunked");
    if body.is_modified() {
        let mut adjusted = headers.clone();
        if chunked {
            adjusted.remove("content-length");
        } else {
            adjusted.set("Content-Length", body.len().to_string());
        }
        adjusted.write_to(out);
    } else {
        headers.write_to(out);
    }
    out.extend_from_slice(b"\r\n");
    body.write_to(chunked, out);
}
