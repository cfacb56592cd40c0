use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::hooks::Phase;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub proxy_address: String,
    pub port: u16,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub hooks: HookCounts,
}

#[derive(Debug, Serialize)]
pub struct HookCounts {
    pub before_request: usize,
    pub before_response: usize,
}

/// Registered handler names per phase, in dispatch order.
#[derive(Debug, Serialize)]
pub struct HookListing {
    pub before_request: Vec<String>,
    pub before_response: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        proxy_address: state.proxy_address.to_string(),
        port: state.proxy_address.port(),
        uptime_secs: state.started.elapsed().as_secs(),
        active_connections: state.connections.active_count(),
        hooks: HookCounts {
            before_request: state.hooks.len(Phase::BeforeRequest),
            before_response: state.hooks.len(Phase::BeforeResponse),
        },
    })
}

pub async fn get_hooks(State(state): State<AdminState>) -> Json<HookListing> {
    Json(HookListing {
        before_request: state.hooks.names(Phase::BeforeRequest),
        before_response: state.hooks.names(Phase::BeforeResponse),
    })
}
