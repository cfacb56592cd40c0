//! Start/stop orchestration for one proxy instance.
//!
//! # Responsibilities
//! - Bind the proxy port (fixed or OS-assigned) and report it
//! - Start the accept loop and, if enabled, the admin API
//! - Stop: refuse new connections, drain in-flight sessions up to the
//!   grace period, abort the rest, release the port
//! - Expose the hook registry and session completion events
//!
//! # Design Decisions
//! - An explicit object, not process-global state; several controllers
//!   can run side by side on different ports
//! - `start` and `stop` serialize on one async mutex, so a concurrent
//!   `start` waits for a `stop` in progress
//! - The hook registry outlives restarts: hooks registered before `start`
//!   or between runs stay registered

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{validate_config, ConfigError, InterceptorConfig};
use crate::error::LifecycleError;
use crate::hooks::HookRegistry;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{ConnectionTracker, Listener};
use crate::proxy::events::{wait_for, SessionEvents, SessionSummary};
use crate::proxy::ProxyEngine;

struct Running {
    address: SocketAddr,
    admin_address: Option<SocketAddr>,
    shutdown: Shutdown,
    engine: JoinHandle<()>,
    admin: Option<JoinHandle<()>>,
}

/// Owns the lifecycle of one intercepting proxy.
pub struct ProxyController {
    config: Arc<InterceptorConfig>,
    hooks: Arc<HookRegistry>,
    events: SessionEvents,
    connections: ConnectionTracker,
    state: Mutex<Option<Running>>,
}

impl ProxyController {
    /// Create a stopped controller. The configuration is used as given.
    pub fn new(config: InterceptorConfig) -> Self {
        Self {
            config: Arc::new(config),
            hooks: Arc::new(HookRegistry::new()),
            events: SessionEvents::new(),
            connections: ConnectionTracker::new(),
            state: Mutex::new(None),
        }
    }

    /// Validate the configuration, then create a stopped controller.
    pub fn init(config: InterceptorConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Registry shared with every session of this proxy.
    pub fn hooks(&self) -> Arc<HookRegistry> {
        Arc::clone(&self.hooks)
    }

    /// Start serving on `preferred_port` (0 = any free port).
    ///
    /// Returns the port actually bound.
    pub async fn start(&self, preferred_port: u16) -> Result<u16, LifecycleError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }

        let listener = Listener::bind(&self.config.listener, preferred_port).await?;
        let address = listener.local_addr().map_err(|source| LifecycleError::Bind {
            address: self.config.listener.bind_host.clone(),
            source,
        })?;

        let shutdown = Shutdown::new();
        let admin = if self.config.admin.enabled {
            Some(self.start_admin(address, &shutdown).await?)
        } else {
            None
        };

        let engine = Arc::new(ProxyEngine::new(
            Arc::clone(&self.config),
            Arc::clone(&self.hooks),
            self.events.clone(),
            self.connections.clone(),
        ));
        let engine = tokio::spawn(engine.serve(listener, shutdown.subscribe()));

        tracing::info!(address = %address, "Proxy started");
        *state = Some(Running {
            address,
            admin_address: admin.as_ref().map(|(addr, _)| *addr),
            shutdown,
            engine,
            admin: admin.map(|(_, task)| task),
        });
        Ok(address.port())
    }

    async fn start_admin(
        &self,
        proxy_address: SocketAddr,
        shutdown: &Shutdown,
    ) -> Result<(SocketAddr, JoinHandle<()>), LifecycleError> {
        let bind_address = &self.config.admin.bind_address;
        let bind_error = |source| LifecycleError::Bind {
            address: bind_address.clone(),
            source,
        };
        let listener = TcpListener::bind(bind_address.as_str())
            .await
            .map_err(bind_error)?;
        let address = listener.local_addr().map_err(bind_error)?;

        let router = setup_admin_router(AdminState {
            hooks: Arc::clone(&self.hooks),
            connections: self.connections.clone(),
            proxy_address,
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            started: Instant::now(),
        });

        let mut signal = shutdown.subscribe();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.triggered().await });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "Admin server failed");
            }
        });

        tracing::info!(address = %address, "Admin API listening");
        Ok((address, task))
    }

    /// Stop serving. A no-op when not running.
    ///
    /// New connections are refused at once and no hook starts after this
    /// is called. In-flight sessions get the configured grace period; any
    /// still running afterwards have their connections closed. The port is
    /// released when this returns.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            tracing::debug!("Stop requested while not running");
            return;
        };

        tracing::info!(address = %running.address, "Proxy stopping");
        running.shutdown.trigger();

        if let Some(admin) = running.admin {
            if let Err(err) = admin.await {
                tracing::error!(error = %err, "Admin task failed");
            }
        }
        if let Err(err) = running.engine.await {
            tracing::error!(error = %err, "Proxy task failed");
        }
        tracing::info!(address = %running.address, "Proxy stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Bound port, if running.
    pub async fn port(&self) -> Option<u16> {
        self.state.lock().await.as_ref().map(|r| r.address.port())
    }

    /// Address to configure as an HTTP proxy in a client.
    pub async fn proxy_address(&self) -> Result<SocketAddr, LifecycleError> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|r| r.address)
            .ok_or(LifecycleError::NotRunning)
    }

    /// Address of the admin API, if running with it enabled.
    pub async fn admin_address(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().and_then(|r| r.admin_address)
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Summaries of sessions that finish after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSummary> {
        self.events.subscribe()
    }

    /// Wait for the first session that finishes after this call and matches
    /// `predicate`. `None` on timeout.
    ///
    /// To avoid missing a fast session, [`subscribe`](Self::subscribe)
    /// before triggering the navigation and use [`wait_for`] on the receiver.
    pub async fn wait_for_response<P>(&self, predicate: P, timeout: Duration) -> Option<SessionSummary>
    where
        P: FnMut(&SessionSummary) -> bool,
    {
        wait_for(&mut self.events.subscribe(), predicate, timeout).await
    }
}

impl Default for ProxyController {
    fn default() -> Self {
        Self::new(InterceptorConfig::default())
    }
}

impl Drop for ProxyController {
    fn drop(&mut self) {
        // Dropped without `stop`: let the accept loop wind down on its own.
        if let Some(running) = self.state.get_mut().as_ref() {
            running.shutdown.trigger();
        }
    }
}
