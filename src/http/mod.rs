//! HTTP/1.x message model.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → codec.rs (read head, bounded)
//!     → request.rs (parse start line + headers.rs fields)
//!     → body.rs (framing: length / chunked / until-close)
//!     → [before-request hooks mutate Request]
//!     → request.rs (serialize, byte-exact when untouched)
//!     → upstream
//!
//! upstream bytes
//!     → codec.rs (read head)
//!     → response.rs (parse)
//!     → codec.rs (buffer body | stream body)
//!     → encoding.rs (decode Content-Encoding on demand)
//!     → [before-response hooks mutate Response]
//!     → response.rs (serialize, Content-Length fixed up)
//!     → client
//! ```
//!
//! # Design Decisions
//! - `serialize(parse(bytes)) == bytes` for every well-formed message
//! - Header lookup is case-insensitive; order and duplicates are preserved
//! - Only HTTP/1.0 and HTTP/1.1 are spoken

pub mod body;
pub mod codec;
pub mod encoding;
mod head;
pub mod headers;
pub mod request;
pub mod response;

pub use body::{Body, Framing};
pub use headers::{HeaderField, Headers};
pub use request::Request;
pub use response::Response;
