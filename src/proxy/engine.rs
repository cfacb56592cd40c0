//! Connection handling and the per-session pipeline.
//!
//! # Responsibilities
//! - Accept client connections and serve each on its own task
//! - Run every transaction through before-request, forward, before-response
//! - Buffer or stream responses depending on what hooks asked for
//! - Turn per-session failures into local error responses
//! - Drain in-flight connections on shutdown, aborting stragglers
//!
//! # Data Flow
//! ```text
//! client ──head──▶ parse ──▶ Session ──▶ before-request hooks
//!                                          │
//!             ShortCircuit(response) ◀─────┤
//!                      │                   ▼
//!                      │          CONNECT? ──▶ 200 + tunnel
//!                      │                   ▼
//!                      │          dial upstream, write request
//!                      │                   ▼
//!                      │          read head (relay 1xx, tunnel 101)
//!                      │                   ▼
//!                      │          buffer_response? ── no ──▶ stream to client
//!                      │                   │ yes
//!                      ▼                   ▼
//!              before-response hooks ◀── read body (+ decode)
//!                      │
//!                      ▼
//!              serialize ──▶ client ──▶ SessionSummary
//! ```
//!
//! # Design Decisions
//! - One upstream connection per session, dropped afterwards
//! - The request line is forwarded verbatim
//! - A connection is reused only for keep-alive exchanges with known framing

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::config::InterceptorConfig;
use crate::error::{DecodeError, ParseError, ProxyError};
use crate::hooks::HookRegistry;
use crate::http::codec::{read_body, read_head, stream_body};
use crate::http::{Framing, Request, Response};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::upstream;
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::proxy::events::{SessionEvents, SessionOutcome, SessionSummary};
use crate::proxy::session::Session;

type Client = BufReader<TcpStream>;

/// Whether a client connection can carry another transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    Close,
}

/// A session that reached the client.
struct Done {
    status: StatusCode,
    outcome: SessionOutcome,
    next: Next,
}

/// The interception engine shared by all connection tasks.
pub struct ProxyEngine {
    config: Arc<InterceptorConfig>,
    hooks: Arc<HookRegistry>,
    events: SessionEvents,
    connections: ConnectionTracker,
}

impl ProxyEngine {
    pub fn new(
        config: Arc<InterceptorConfig>,
        hooks: Arc<HookRegistry>,
        events: SessionEvents,
        connections: ConnectionTracker,
    ) -> Self {
        Self {
            config,
            hooks,
            events,
            connections,
        }
    }

    /// Accept loop.
    ///
    /// Returns after shutdown is triggered, the listener is closed and every
    /// connection task has finished or been aborted at the grace deadline.
    pub async fn serve(self: Arc<Self>, listener: Listener, mut shutdown: ShutdownSignal) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Connection task panicked");
                        }
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let engine = Arc::clone(&self);
                        let signal = shutdown.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            engine.serve_connection(stream, peer, signal).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        // Back off so fd exhaustion does not spin the loop.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(in_flight = tasks.len(), "Listener closed, draining connections");
        self.drain(tasks).await;
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        let grace = self.config.timeouts.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed, aborting connections"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    async fn serve_connection(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: ShutdownSignal) {
        let guard = self.connections.track();
        let _ = stream.set_nodelay(true);
        let mut client = BufReader::new(stream);
        let limits = &self.config.limits;

        loop {
            let head = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                head = timed(self.config.timeouts.read(), read_head(&mut client, limits.max_head_bytes)) => head,
            };
            let head = match head {
                Ok(Some(head)) => head,
                Ok(None) => break,
                Err(ProxyError::Io(err)) => {
                    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %err, "Client read ended");
                    break;
                }
                Err(err) => {
                    self.reject(&mut client, peer, err).await;
                    break;
                }
            };

            if self.transaction(&mut client, peer, &head, &shutdown).await == Next::Close {
                break;
            }
        }

        let _ = client.get_mut().shutdown().await;
    }

    /// Answer input that never became a session.
    async fn reject(&self, client: &mut Client, peer: SocketAddr, err: ProxyError) {
        tracing::warn!(peer_addr = %peer, kind = err.kind(), error = %err, "Rejected client request");
        if let Some(status) = err.status() {
            let response = Response::local_error(status, &err.to_string());
            let _ = write_response(client, &response).await;
        }
    }

    async fn read_request(&self, client: &mut Client, head: &[u8]) -> Result<Request, ProxyError> {
        let mut request = Request::from_head(head)?;
        if !request.is_connect() {
            let limit = self.config.limits.max_body_bytes;
            let body = timed(
                self.config.timeouts.read(),
                read_body(client, request.framing()?, limit),
            )
            .await
            .map_err(|err| match err {
                ProxyError::BodyTooLarge { limit } => ProxyError::RequestTooLarge { limit },
                other => other,
            })?;
            request.set_wire_body(body);
        }
        Ok(request)
    }

    async fn transaction(
        &self,
        client: &mut Client,
        peer: SocketAddr,
        head: &[u8],
        shutdown: &ShutdownSignal,
    ) -> Next {
        let request = match self.read_request(client, head).await {
            Ok(request) => request,
            Err(err) => {
                self.reject(client, peer, err).await;
                return Next::Close;
            }
        };

        let mut session = Session::new(peer, request);
        session.set_body_limit(self.config.limits.max_body_bytes);
        let method = session.request().method().clone();
        tracing::debug!(
            session_id = %session.id(),
            peer_addr = %peer,
            method = %method,
            url = session.url(),
            "Session started"
        );

        let mut responded = None;
        let result = self
            .run_session(client, &mut session, shutdown, &mut responded)
            .await;

        let (outcome, status, next, error) = match result {
            Ok(done) => (done.outcome, Some(done.status), done.next, None),
            Err(err) => {
                let outcome = match err {
                    ProxyError::ShuttingDown => SessionOutcome::Aborted,
                    _ => SessionOutcome::Failed,
                };
                let mut status = responded;
                if responded.is_none() {
                    if let Some(code) = err.status() {
                        let response = Response::local_error(code, &err.to_string());
                        if write_response(client, &response).await.is_ok() {
                            status = Some(code);
                        }
                    }
                }
                tracing::warn!(
                    session_id = %session.id(),
                    url = session.url(),
                    kind = err.kind(),
                    error = %err,
                    "Session failed"
                );
                (outcome, status, Next::Close, Some(err.to_string()))
            }
        };

        let elapsed = session.elapsed();
        metrics::record_session(outcome, status.map(|s| s.as_u16()), elapsed);
        tracing::info!(
            session_id = %session.id(),
            method = %method,
            url = session.url(),
            status = status.map(|s| s.as_u16()),
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Session finished"
        );
        self.events.publish(SessionSummary {
            id: session.id(),
            method,
            url: session.url().to_string(),
            status,
            outcome,
            elapsed,
            error,
        });

        next
    }

    async fn run_session(
        &self,
        client: &mut Client,
        session: &mut Session,
        shutdown: &ShutdownSignal,
        responded: &mut Option<StatusCode>,
    ) -> Result<Done, ProxyError> {
        if let Some(mut response) = self.hooks.dispatch_request(session, shutdown).await? {
            self.hooks
                .dispatch_response(session, &mut response, shutdown)
                .await?;
            let next = keep_alive(session.request(), &response);
            *responded = Some(response.status());
            write_response(client, &response).await?;
            return Ok(Done {
                status: response.status(),
                outcome: SessionOutcome::ShortCircuited,
                next,
            });
        }

        if session.request().is_connect() {
            return self.tunnel_connect(client, session, responded).await;
        }

        let (host, port) = session.upstream()?;
        let target = format!("{host}:{port}");
        let stream = upstream::connect(&host, port, self.config.timeouts.connect()).await?;
        let mut origin = BufReader::new(stream);
        origin
            .write_all(&session.request().to_bytes())
            .await
            .map_err(|source| unreachable_upstream(&target, source))?;
        origin
            .flush()
            .await
            .map_err(|source| unreachable_upstream(&target, source))?;

        let method = session.request().method().clone();
        let read_timeout = self.config.timeouts.read();
        let limits = &self.config.limits;

        let mut response = loop {
            let head = timed(read_timeout, read_head(&mut origin, limits.max_head_bytes))
                .await
                .map_err(|err| from_upstream(&target, err))?
                .ok_or(ProxyError::BadUpstreamResponse(ParseError::Truncated))?;
            let response = Response::from_head(&head).map_err(ProxyError::BadUpstreamResponse)?;
            if response.status().is_informational() && !response.is_upgrade() {
                client.write_all(&head).await?;
                continue;
            }
            break response;
        };

        if response.is_upgrade() {
            *responded = Some(response.status());
            client.write_all(&response.head_bytes()).await?;
            client.flush().await?;
            if let Err(err) = upstream::tunnel(client, &mut origin).await {
                tracing::debug!(session_id = %session.id(), error = %err, "Upgraded connection closed");
            }
            return Ok(Done {
                status: response.status(),
                outcome: SessionOutcome::Tunnelled,
                next: Next::Close,
            });
        }

        let framing = response
            .framing_for(&method)
            .map_err(ProxyError::BadUpstreamResponse)?;

        if !session.flags().buffer_response {
            *responded = Some(response.status());
            client.write_all(&response.head_bytes()).await?;
            let relayed = stream_body(&mut origin, client, framing, read_timeout)
                .await
                .map_err(|err| match err {
                    ProxyError::MalformedMessage(e) => ProxyError::BadUpstreamResponse(e),
                    other => other,
                })?;
            tracing::trace!(session_id = %session.id(), bytes = relayed, "Response streamed");
            return Ok(Done {
                status: response.status(),
                outcome: SessionOutcome::Completed,
                next: keep_alive(session.request(), &response),
            });
        }

        let body = timed(read_timeout, read_body(&mut origin, framing, limits.max_body_bytes))
            .await
            .map_err(|err| from_upstream(&target, err))?;
        response.set_wire_body(body);
        if session.flags().decode_response && framing != Framing::Empty {
            response
                .decode_body(limits.max_body_bytes)
                .map_err(|err| match err {
                    DecodeError::TooLarge { limit } => ProxyError::BodyTooLarge { limit },
                    other => ProxyError::Decode(other),
                })?;
            session.mark_response_decoded();
        }

        self.hooks
            .dispatch_response(session, &mut response, shutdown)
            .await?;

        let next = keep_alive(session.request(), &response);
        *responded = Some(response.status());
        write_response(client, &response).await?;
        Ok(Done {
            status: response.status(),
            outcome: SessionOutcome::Completed,
            next,
        })
    }

    async fn tunnel_connect(
        &self,
        client: &mut Client,
        session: &mut Session,
        responded: &mut Option<StatusCode>,
    ) -> Result<Done, ProxyError> {
        if !self.config.tunnel.allow_connect {
            let response = Response::local_error(StatusCode::METHOD_NOT_ALLOWED, "CONNECT is disabled");
            *responded = Some(response.status());
            write_response(client, &response).await?;
            return Ok(Done {
                status: response.status(),
                outcome: SessionOutcome::Completed,
                next: Next::Close,
            });
        }

        let (host, port) = session.upstream()?;
        let mut origin = upstream::connect(&host, port, self.config.timeouts.connect()).await?;

        *responded = Some(StatusCode::OK);
        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
        client.flush().await?;

        match upstream::tunnel(client, &mut origin).await {
            Ok((up, down)) => tracing::debug!(
                session_id = %session.id(),
                bytes_up = up,
                bytes_down = down,
                "Tunnel closed"
            ),
            Err(err) => tracing::debug!(session_id = %session.id(), error = %err, "Tunnel reset"),
        }
        Ok(Done {
            status: StatusCode::OK,
            outcome: SessionOutcome::Tunnelled,
            next: Next::Close,
        })
    }
}

fn keep_alive(request: &Request, response: &Response) -> Next {
    if request.wants_close() || response.closes_connection(request.method()) {
        Next::Close
    } else {
        Next::KeepAlive
    }
}

async fn write_response(client: &mut Client, response: &Response) -> Result<(), ProxyError> {
    client.write_all(&response.to_bytes()).await?;
    client.flush().await?;
    Ok(())
}

/// Bound a read; expiry surfaces as an I/O timeout.
async fn timed<T, F>(limit: Duration, read: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(limit, read).await {
        Ok(result) => result,
        Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out").into()),
    }
}

fn unreachable_upstream(target: &str, source: io::Error) -> ProxyError {
    ProxyError::UpstreamUnreachable {
        upstream: target.to_string(),
        source,
    }
}

/// Re-attribute a failed upstream read to the upstream.
fn from_upstream(target: &str, err: ProxyError) -> ProxyError {
    match err {
        ProxyError::MalformedMessage(e) => ProxyError::BadUpstreamResponse(e),
        ProxyError::Io(source) => unreachable_upstream(target, source),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_rules() {
        let request = Request::parse(b"GET http://a/ HTTP/1.1\r\n\r\n").unwrap();
        let sized = Response::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(keep_alive(&request, &sized), Next::KeepAlive);

        let until_close = Response::parse(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert_eq!(keep_alive(&request, &until_close), Next::Close);

        let closing = Request::parse(b"GET http://a/ HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert_eq!(keep_alive(&closing, &sized), Next::Close);

        let old = Request::parse(b"GET http://a/ HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(keep_alive(&old, &sized), Next::Close);
    }

    #[test]
    fn upstream_read_errors_become_gateway_errors() {
        let parse = from_upstream("a:80", ParseError::Truncated.into());
        assert_eq!(parse.status(), Some(StatusCode::BAD_GATEWAY));

        let timeout = from_upstream("a:80", io::Error::from(io::ErrorKind::TimedOut).into());
        assert!(matches!(timeout, ProxyError::UpstreamUnreachable { .. }));
    }

    #[tokio::test]
    async fn timed_reports_expiry_as_io_timeout() {
        let err = timed(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), ProxyError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
    }
}
