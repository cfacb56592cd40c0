//! Async wire I/O for message heads and bodies.
//!
//! # Responsibilities
//! - Read one message head from a buffered stream, bounded in size
//! - Buffer a body completely (bounded) for hooks to inspect
//! - Stream a body through unchanged when nobody asked for buffering
//!
//! # Design Decisions
//! - Chunked bodies are parsed while streaming so the end of the message
//!   is known without waiting for the peer to close
//! - The buffered path keeps the original chunked bytes so an untouched
//!   body is relayed exactly as received

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ParseError, ProxyError};
use crate::http::body::{parse_chunk_size, Body, Framing};

/// Read a message head up to and including the blank line.
///
/// Returns `None` if the stream ends before any byte of a new message.
pub async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let remaining = max_bytes.saturating_sub(head.len());
        if remaining == 0 {
            return Err(ParseError::HeadTooLarge(max_bytes).into());
        }
        let before = head.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut head)
            .await?;
        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(ParseError::Truncated.into());
        }
        if !head.ends_with(b"\n") {
            // `take` ran out before the line ended.
            return Err(ParseError::HeadTooLarge(max_bytes).into());
        }
        // Tolerate empty lines before a request line (RFC 9112 section 2.2).
        if before == 0 && head == b"\r\n" {
            head.clear();
            continue;
        }
        if head[before..] == *b"\r\n" {
            return Ok(Some(head));
        }
    }
}

/// Read a whole body into memory, refusing bodies over `limit` bytes.
pub async fn read_body<R>(reader: &mut R, framing: Framing, limit: usize) -> Result<Body, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::Empty => Ok(Body::empty()),
        Framing::Length(n) => {
            if n > limit as u64 {
                return Err(ProxyError::BodyTooLarge { limit });
            }
            let mut payload = vec![0u8; n as usize];
            reader.read_exact(&mut payload).await.map_err(truncated)?;
            Ok(Body::from_wire(Bytes::from(payload), None))
        }
        Framing::UntilClose => {
            let mut payload = Vec::new();
            (&mut *reader)
                .take(limit as u64 + 1)
                .read_to_end(&mut payload)
                .await?;
            if payload.len() > limit {
                return Err(ProxyError::BodyTooLarge { limit });
            }
            Ok(Body::from_wire(Bytes::from(payload), None))
        }
        Framing::Chunked => {
            let mut wire = Vec::new();
            let mut payload = Vec::new();
            loop {
                let line = read_line(reader, &mut wire).await?;
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    while !read_line(reader, &mut wire).await?.is_empty() {}
                    break;
                }
                if size > limit.saturating_sub(payload.len()) {
                    return Err(ProxyError::BodyTooLarge { limit });
                }
                let start = payload.len();
                payload.resize(start + size, 0);
                reader.read_exact(&mut payload[start..]).await.map_err(truncated)?;
                wire.extend_from_slice(&payload[start..]);
                expect_crlf(reader, &mut wire).await?;
            }
            Ok(Body::from_wire(Bytes::from(payload), Some(Bytes::from(wire))))
        }
    }
}

/// Copy a body from `reader` to `writer` without buffering it.
///
/// Every read from `reader` must make progress within `idle`, otherwise the
/// copy fails with `TimedOut`. Returns the number of payload bytes relayed.
pub async fn stream_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: Framing,
    idle: Duration,
) -> Result<u64, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match framing {
        Framing::Empty => 0,
        Framing::Length(n) => {
            let copied = copy_idle(reader, writer, Some(n), idle).await?;
            if copied < n {
                return Err(ParseError::Truncated.into());
            }
            copied
        }
        Framing::UntilClose => copy_idle(reader, writer, None, idle).await?,
        Framing::Chunked => {
            let mut total = 0u64;
            let mut scratch = Vec::new();
            loop {
                scratch.clear();
                let line = idle_read(idle, read_line(reader, &mut scratch)).await?;
                writer.write_all(&scratch).await?;
                let size = parse_chunk_size(&line)? as u64;
                if size == 0 {
                    loop {
                        scratch.clear();
                        let trailer = idle_read(idle, read_line(reader, &mut scratch)).await?;
                        writer.write_all(&scratch).await?;
                        if trailer.is_empty() {
                            break;
                        }
                    }
                    break;
                }
                let copied = copy_idle(reader, writer, Some(size), idle).await?;
                if copied < size {
                    return Err(ParseError::Truncated.into());
                }
                total = total.saturating_add(copied);
                scratch.clear();
                idle_read(idle, expect_crlf(reader, &mut scratch)).await?;
                writer.write_all(&scratch).await?;
            }
            total
        }
    };
    writer.flush().await?;
    Ok(copied)
}

/// Copy up to `limit` bytes (or until EOF) one buffered read at a time.
async fn copy_idle<R, W>(
    reader: &mut R,
    writer: &mut W,
    limit: Option<u64>,
    idle: Duration,
) -> Result<u64, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    loop {
        let wanted = match limit {
            Some(limit) if copied >= limit => break,
            Some(limit) => limit - copied,
            None => u64::MAX,
        };
        let buf = idle_read(idle, async { reader.fill_buf().await.map_err(ProxyError::from) }).await?;
        if buf.is_empty() {
            break;
        }
        let n = buf.len().min(usize::try_from(wanted).unwrap_or(usize::MAX));
        writer.write_all(&buf[..n]).await?;
        reader.consume(n);
        copied += n as u64;
    }
    Ok(copied)
}

async fn idle_read<T, F>(idle: Duration, read: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(idle, read).await {
        Ok(result) => result,
        Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "body read stalled").into()),
    }
}

/// Longest chunk-size or trailer line accepted.
const MAX_LINE: u64 = 8 * 1024;

/// Read one CRLF-terminated line, appending the raw bytes to `wire` and
/// returning the line without its terminator.
async fn read_line<R>(reader: &mut R, wire: &mut Vec<u8>) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader).take(MAX_LINE).read_until(b'\n', &mut line).await?;
    wire.extend_from_slice(&line);
    match line.strip_suffix(b"\r\n") {
        Some(content) => Ok(content.to_vec()),
        None if line.is_empty() => Err(ParseError::Truncated.into()),
        None => Err(ParseError::InvalidChunk("line not terminated by CRLF".into()).into()),
    }
}

async fn expect_crlf<R>(reader: &mut R, wire: &mut Vec<u8>) -> Result<(), ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await.map_err(truncated)?;
    wire.extend_from_slice(&crlf);
    if crlf != *b"\r\n" {
        return Err(ParseError::InvalidChunk("missing CRLF after chunk data".into()).into());
    }
    Ok(())
}

fn truncated(err: std::io::Error) -> ProxyError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ParseError::Truncated.into()
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const IDLE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn reads_head_and_leaves_body() {
        let input: &[u8] = b"\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\nbody";
        let mut reader = BufReader::new(input);
        let head = read_head(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");

        let body = read_body(&mut reader, Framing::Length(4), 1024).await.unwrap();
        assert_eq!(body.as_bytes(), b"body");
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_head(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let input = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(100));
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_head(&mut reader, 32).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedMessage(ParseError::HeadTooLarge(32))));
    }

    #[tokio::test]
    async fn buffered_chunked_body_keeps_wire() {
        let input: &[u8] = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut reader = BufReader::new(input);
        let body = read_body(&mut reader, Framing::Chunked, 1024).await.unwrap();
        assert_eq!(body.as_bytes(), b"hello world");

        let mut out = Vec::new();
        body.write_to(true, &mut out);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn body_limit_enforced() {
        let mut reader = BufReader::new(&b"0123456789"[..]);
        let err = read_body(&mut reader, Framing::UntilClose, 4).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn streams_chunked_verbatim() {
        let input: &[u8] = b"3\r\nabc\r\n0\r\nTrailer: x\r\n\r\nNEXT";
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        let n = stream_body(&mut reader, &mut out, Framing::Chunked, IDLE).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, &input[..input.len() - 4]);
    }

    #[tokio::test]
    async fn huge_chunk_size_is_an_error_not_a_panic() {
        let mut reader = BufReader::new(&b"1\r\na\r\nffffffffffffffff\r\n"[..]);
        let err = read_body(&mut reader, Framing::Chunked, 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let (mut origin, far_end) = tokio::io::duplex(64);
        origin.write_all(b"hello").await.unwrap();
        let mut reader = BufReader::new(far_end);
        let mut out = Vec::new();

        let err = stream_body(&mut reader, &mut out, Framing::Length(100), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
        assert_eq!(out, b"hello");
        drop(origin);
    }

    #[tokio::test]
    async fn truncated_length_body_fails() {
        let mut reader = BufReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        let err = stream_body(&mut reader, &mut out, Framing::Length(10), IDLE).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedMessage(ParseError::Truncated)));
    }
}
