//! Content-Encoding decoding.
//!
//! Stacked encodings (`Content-Encoding: deflate, gzip`) are undone from
//! the last applied to the first. `deflate` accepts both zlib-wrapped and
//! raw streams since servers disagree on which one the name means.

use std::io::Read;

use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

use crate::error::DecodeError;

/// Decode `body` according to a `Content-Encoding` header value.
///
/// No stage may produce more than `limit` bytes.
pub fn decode(content_encoding: &str, body: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut current = body.to_vec();
    for encoding in content_encoding.rsplit(',') {
        let encoding = encoding.trim().to_ascii_lowercase();
        current = match encoding.as_str() {
            "" | "identity" => current,
            "gzip" | "x-gzip" => read_all(MultiGzDecoder::new(&current[..]), &encoding, limit)?,
            "deflate" => match read_all(ZlibDecoder::new(&current[..]), &encoding, limit) {
                Ok(decoded) => decoded,
                Err(DecodeError::TooLarge { limit }) => return Err(DecodeError::TooLarge { limit }),
                Err(_) => read_all(DeflateDecoder::new(&current[..]), &encoding, limit)?,
            },
            other => return Err(DecodeError::Unsupported(other.to_string())),
        };
    }
    Ok(current)
}

fn read_all(reader: impl Read, encoding: &str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Corrupt {
            encoding: encoding.to_string(),
            source,
        })?;
    if out.len() > limit {
        return Err(DecodeError::TooLarge { limit });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    const LIMIT: usize = 1024 * 1024;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decodes_gzip() {
        let decoded = decode("gzip", &gzip(b"<html></html>"), LIMIT).unwrap();
        assert_eq!(decoded, b"<html></html>");
    }

    #[test]
    fn decodes_both_deflate_flavours() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"zlib body").unwrap();
        assert_eq!(decode("deflate", &zlib.finish().unwrap(), LIMIT).unwrap(), b"zlib body");

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw body").unwrap();
        assert_eq!(decode("Deflate", &raw.finish().unwrap(), LIMIT).unwrap(), b"raw body");
    }

    #[test]
    fn decodes_stacked_encodings_in_reverse() {
        let twice = gzip(&gzip(b"layered"));
        assert_eq!(decode("gzip, x-gzip", &twice, LIMIT).unwrap(), b"layered");
    }

    #[test]
    fn identity_is_passthrough() {
        assert_eq!(decode("identity", b"plain", LIMIT).unwrap(), b"plain");
    }

    #[test]
    fn rejects_unknown_and_corrupt() {
        assert!(matches!(decode("br", b"x", LIMIT), Err(DecodeError::Unsupported(e)) if e == "br"));
        assert!(matches!(decode("gzip", b"not gzip", LIMIT), Err(DecodeError::Corrupt { .. })));
    }

    #[test]
    fn expansion_past_limit_is_refused() {
        let bomb = gzip(&vec![0u8; 2 * LIMIT]);
        assert!(bomb.len() < LIMIT / 100);
        assert!(matches!(
            decode("gzip", &bomb, LIMIT),
            Err(DecodeError::TooLarge { limit: LIMIT })
        ));

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&vec![0u8; 2 * LIMIT]).unwrap();
        assert!(matches!(
            decode("deflate", &zlib.finish().unwrap(), LIMIT),
            Err(DecodeError::TooLarge { .. })
        ));

        assert_eq!(decode("gzip", &gzip(&[7u8; 64]), 64).unwrap(), vec![7u8; 64]);
    }
}
