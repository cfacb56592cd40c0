//! Admin status API.
//!
//! Read-only JSON endpoints behind a bearer key, served on their own
//! listener while the proxy runs.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::hooks::HookRegistry;
use crate::net::ConnectionTracker;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub hooks: Arc<HookRegistry>,
    pub connections: ConnectionTracker,
    pub proxy_address: SocketAddr,
    pub api_key: Arc<str>,
    pub started: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/hooks", get(get_hooks))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
