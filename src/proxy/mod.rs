//! Proxy engine subsystem.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → engine.rs serve_connection (one task per client connection)
//!     → session.rs Session (one per request/response transaction)
//!     → hooks::HookRegistry dispatch (before-request, before-response)
//!     → events.rs SessionSummary (published after relay)
//! ```
//!
//! # Design Decisions
//! - A session is owned by exactly one task; nothing in it is shared
//! - Per-session failures never escape the connection task

pub mod engine;
pub mod events;
pub mod session;

pub use engine::ProxyEngine;
pub use events::{wait_for, SessionEvents, SessionOutcome, SessionSummary};
pub use session::{Session, SessionFlags, SessionId};
