//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use intercepting_proxy::{InterceptorConfig, ProxyController};

/// Start a mock origin. `respond` gets the raw request head and returns
/// the raw response bytes. Every connection is closed after one response.
pub async fn start_programmable_backend<F, Fut>(respond: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let response = respond(String::from_utf8_lossy(&head).into_owned()).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A complete response with a `Content-Length` body.
pub fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// Origin that answers every request with its own request head as text.
pub async fn start_echo_backend() -> SocketAddr {
    start_programmable_backend(|head| async move {
        response("200 OK", &[("Content-Type", "text/plain")], head.as_bytes())
    })
    .await
}

/// Origin serving `html`, gzip-compressed when `gzip` is set.
pub async fn start_html_backend(html: &'static str, gzip: bool) -> SocketAddr {
    start_programmable_backend(move |_| async move {
        if gzip {
            response(
                "200 OK",
                &[("Content-Type", "text/html; charset=utf-8"), ("Content-Encoding", "gzip")],
                &gzip_bytes(html.as_bytes()),
            )
        } else {
            response("200 OK", &[("Content-Type", "text/html; charset=utf-8")], html.as_bytes())
        }
    })
    .await
}

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Start a proxy on a free port.
pub async fn start_proxy(config: InterceptorConfig) -> (ProxyController, u16) {
    let proxy = ProxyController::init(config).unwrap();
    let port = proxy.start(0).await.unwrap();
    (proxy, port)
}

/// Client that sends every `http://` request through the proxy.
pub fn proxy_client(port: u16) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://127.0.0.1:{port}")).unwrap())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
