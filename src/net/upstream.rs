//! Upstream dialing and byte tunnels.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ProxyError;

/// Open a TCP connection to `host:port`, bounded by `timeout`.
///
/// Every failure, including the timeout, is `UpstreamUnreachable`.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let upstream = format!("{host}:{port}");
    let attempt = TcpStream::connect((host, port));
    let stream = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ProxyError::UpstreamUnreachable { upstream, source }),
        Err(_elapsed) => {
            return Err(ProxyError::UpstreamUnreachable {
                upstream,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };
    stream.set_nodelay(true)?;
    tracing::trace!(upstream = %upstream, "Upstream connected");
    Ok(stream)
}

/// Shuttle bytes both ways until either side closes.
///
/// Returns `(client_to_upstream, upstream_to_client)` byte counts.
pub async fn tunnel<A, B>(client: &mut A, upstream: &mut B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(client, upstream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = connect("127.0.0.1", port, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnreachable { .. }));
        assert_eq!(err.status(), Some(http::StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn tunnel_relays_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
        });

        let (mut near, mut far) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move {
            let mut upstream = connect("127.0.0.1", addr.port(), Duration::from_secs(2))
                .await
                .unwrap();
            tunnel(&mut far, &mut upstream).await.unwrap()
        });

        near.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        near.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
        drop(near);

        let (up, down) = relay.await.unwrap();
        assert_eq!((up, down), (4, 4));
    }
}
