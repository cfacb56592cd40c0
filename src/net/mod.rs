//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID + active count for the connection's lifetime)
//!     → Hand off to proxy engine
//!
//! Outgoing:
//!     proxy engine → upstream.rs connect (bounded by connect timeout)
//!     CONNECT / 101 → upstream.rs tunnel (opaque bytes both ways)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so the admin API can report it
//! - No upstream pooling: one upstream connection per session

pub mod connection;
pub mod listener;
pub mod upstream;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener};
