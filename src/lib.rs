//! Local HTTP intercepting proxy with ordered request/response hooks.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │               INTERCEPTING PROXY                 │
//!                        │                                                  │
//!   Client (browser)     │  ┌─────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ─────────────────────┼─▶│   net   │──▶│  http   │──▶│    hooks     │    │
//!                        │  │listener │   │  parse  │   │before-request│    │
//!                        │  └─────────┘   └─────────┘   └──────┬───────┘    │
//!                        │                                     │            │
//!                        │                                     ▼            │
//!                        │                              ┌──────────────┐    │
//!                        │                              │    proxy     │────┼──▶ Origin
//!                        │                              │    engine    │◀───┼───
//!                        │                              └──────┬───────┘    │
//!                        │                                     │            │
//!   Client Response      │  ┌─────────┐   ┌─────────┐   ┌──────▼───────┐    │
//!   ◀────────────────────┼──│ relay / │◀──│  http   │◀──│    hooks     │    │
//!                        │  │ stream  │   │ encode  │   │before-response│   │
//!                        │  └─────────┘   └─────────┘   └──────────────┘    │
//!                        │                                                  │
//!                        │  config · lifecycle · observability · admin      │
//!                        └──────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use intercepting_proxy::{Action, InterceptorConfig, ProxyController};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = ProxyController::init(InterceptorConfig::default())?;
//! proxy.hooks().on_before_request("add-header", |ctx| {
//!     ctx.request_mut().headers_mut().set("X-Test", "1");
//!     Ok(Action::Continue)
//! });
//! let port = proxy.start(0).await?;
//! // point a client at 127.0.0.1:{port}
//! # let _ = port;
//! proxy.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;

pub use config::InterceptorConfig;
pub use error::{LifecycleError, ParseError, ProxyError};
pub use hooks::{
    Action, HookError, HookRegistry, HookScope, HookToken, RequestContext, RequestHook,
    ResponseContext, ResponseHook,
};
pub use crate::http::{Request, Response};
pub use lifecycle::ProxyController;
pub use proxy::{SessionOutcome, SessionSummary};
