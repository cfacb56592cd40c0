//! Interception hooks.
//!
//! # Data Flow
//! ```text
//! caller
//!     → registry.rs register_before_request / register_before_response → HookToken
//!
//! per session (proxy engine):
//!     snapshot before-request list
//!         → hook.rs RequestHook::before_request(RequestContext)   (context.rs)
//!         → Continue | ShortCircuit(Response) | Err → HandlerFailure
//!     forward upstream (unless short-circuited)
//!     if buffering was requested:
//!         snapshot before-response list
//!             → ResponseHook::before_response(ResponseContext)
//! ```
//!
//! # Design Decisions
//! - Registry is copy-on-write; no lock is held while a handler runs
//! - Contexts borrow the session for one call only, so handlers cannot
//!   retain a request or response past its phase
//! - A failing handler aborts only its own session

pub mod builtin;
pub mod context;
pub mod hook;
pub mod registry;

pub use context::{RequestContext, ResponseContext};
pub use hook::{Action, FnRequestHook, FnResponseHook, HookError, RequestHook, ResponseHook};
pub use registry::{HookRegistry, HookScope, HookToken, Phase};
