//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind the proxy port, fixed or OS-assigned
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;
use crate::error::LifecycleError;

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind `config.bind_host` on `port` (0 = any free port).
    ///
    /// A fixed port that cannot be bound is reported as
    /// [`LifecycleError::PortUnavailable`]; nothing is left bound on failure.
    pub async fn bind(config: &ListenerConfig, port: u16) -> Result<Self, LifecycleError> {
        let ip: IpAddr = config.bind_host.parse().map_err(|e| LifecycleError::Bind {
            address: config.bind_host.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        let addr = SocketAddr::new(ip, port);

        let listener = TcpListener::bind(addr).await.map_err(|source| {
            if port != 0 {
                LifecycleError::PortUnavailable { port, source }
            } else {
                LifecycleError::Bind {
                    address: addr.to_string(),
                    source,
                }
            }
        })?;

        let local_addr = listener.local_addr().map_err(|source| LifecycleError::Bind {
            address: addr.to_string(),
            source,
        })?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(io::Error::other)?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn port_zero_picks_free_port() {
        let listener = Listener::bind(&ListenerConfig::default(), 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert_eq!(listener.available_permits(), listener.max_connections());
    }

    #[tokio::test]
    async fn taken_port_is_unavailable() {
        let first = Listener::bind(&ListenerConfig::default(), 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = Listener::bind(&ListenerConfig::default(), port).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PortUnavailable { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn permits_follow_connections() {
        let config = ListenerConfig {
            max_connections: 2,
            ..ListenerConfig::default()
        };
        let listener = Listener::bind(&config, 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }
}
