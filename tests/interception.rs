//! End-to-end interception tests: a reqwest client talks to mock origins
//! through a running proxy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use intercepting_proxy::hooks::builtin::{BasicAuth, ScriptInjection};
use intercepting_proxy::proxy::wait_for;
use intercepting_proxy::{Action, HookError, InterceptorConfig, Response, SessionOutcome};

mod common;

#[tokio::test]
async fn basic_auth_header_reaches_origin() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    proxy
        .hooks()
        .register_before_request(Arc::new(BasicAuth::new("admin", "admin")));

    let body = common::proxy_client(port)
        .get(format!("http://{origin}/secure"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.starts_with(&format!("GET http://{origin}/secure HTTP/1.1\r\n")));
    assert!(body.contains("Authorization: Basic YWRtaW46YWRtaW4=\r\n"));
    proxy.stop().await;
}

#[tokio::test]
async fn request_hooks_run_in_registration_order() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let hooks = proxy.hooks();
    hooks.on_before_request("first", |ctx| {
        ctx.request_mut().headers_mut().append("X-Order", "H1");
        Ok(Action::Continue)
    });
    hooks.on_before_request("second", |ctx| {
        ctx.request_mut().headers_mut().append("X-Order", "H2");
        Ok(Action::Continue)
    });

    let body = common::proxy_client(port)
        .get(format!("http://{origin}/ordered"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("X-Order: H1\r\nX-Order: H2\r\n"), "{body}");
    proxy.stop().await;
}

#[tokio::test]
async fn unregistered_hook_no_longer_runs() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let token = proxy.hooks().on_before_request("tag", |ctx| {
        ctx.request_mut().headers_mut().set("X-Tag", "yes");
        Ok(Action::Continue)
    });
    let client = common::proxy_client(port);
    let url = format!("http://{origin}/tag");

    let first = client.get(&url).send().await.unwrap().text().await.unwrap();
    assert!(first.contains("X-Tag: yes"));

    assert!(proxy.hooks().unregister(token));
    let second = client.get(&url).send().await.unwrap().text().await.unwrap();
    assert!(!second.contains("X-Tag"));
    proxy.stop().await;
}

#[tokio::test]
async fn response_hooks_skipped_without_buffering() {
    let origin = common::start_html_backend("<html><head></head></html>", true).await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let called = Arc::new(AtomicBool::new(false));
    let seen = called.clone();
    proxy.hooks().on_before_response("observer", move |_| {
        seen.store(true, Ordering::SeqCst);
        Ok(Action::Continue)
    });

    let response = common::proxy_client(port)
        .get(format!("http://{origin}/page"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["content-encoding"], "gzip");
    let body = response.bytes().await.unwrap();

    assert_eq!(body.as_ref(), common::gzip_bytes(b"<html><head></head></html>").as_slice());
    assert!(!called.load(Ordering::SeqCst));
    proxy.stop().await;
}

#[tokio::test]
async fn script_injected_into_gzipped_page() {
    let origin = common::start_html_backend("<html><head><title>t</title></head><body></body></html>", true).await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let url = format!("http://{origin}/index.html");
    Arc::new(ScriptInjection::new(url.clone(), "window.injected = true;")).register(&proxy.hooks());

    let response = common::proxy_client(port).get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("content-encoding").is_none());
    let length: usize = response.headers()["content-length"].to_str().unwrap().parse().unwrap();
    let body = response.text().await.unwrap();

    assert_eq!(
        body,
        "<html><head><script>window.injected = true;</script><title>t</title></head><body></body></html>"
    );
    assert_eq!(length, body.len());

    let other = common::proxy_client(port)
        .get(format!("http://{origin}/other.html"))
        .send()
        .await
        .unwrap();
    assert_eq!(other.headers()["content-encoding"], "gzip");
    proxy.stop().await;
}

#[tokio::test]
async fn revalidated_injection_target_passes_through() {
    let origin = common::start_programmable_backend(|_| async {
        b"HTTP/1.1 304 Not Modified\r\nContent-Encoding: gzip\r\nContent-Type: text/html\r\nETag: \"v1\"\r\n\r\n".to_vec()
    })
    .await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let url = format!("http://{origin}/index.html");
    Arc::new(ScriptInjection::new(url.clone(), "window.injected = true;")).register(&proxy.hooks());

    let response = common::proxy_client(port)
        .get(&url)
        .header("If-None-Match", "\"v1\"")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 304);
    assert_eq!(response.headers()["etag"], "\"v1\"");
    proxy.stop().await;
}

#[tokio::test]
async fn decoded_body_over_limit_is_bad_gateway() {
    let origin = common::start_programmable_backend(|_| async {
        common::response(
            "200 OK",
            &[("Content-Type", "text/html"), ("Content-Encoding", "gzip")],
            &common::gzip_bytes(&vec![b'a'; 64 * 1024]),
        )
    })
    .await;
    let mut config = InterceptorConfig::default();
    config.limits.max_body_bytes = 4 * 1024;
    let (proxy, port) = common::start_proxy(config).await;
    proxy.hooks().on_before_request("decode", |ctx| {
        ctx.set_decode_response(true);
        Ok(Action::Continue)
    });

    let response = common::proxy_client(port)
        .get(format!("http://{origin}/expands"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    proxy.stop().await;
}

#[tokio::test]
async fn short_circuit_skips_upstream() {
    let port_without_origin = common::closed_port().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    proxy.hooks().on_before_request("stub", |_| {
        Ok(Action::ShortCircuit(Response::synthetic(
            StatusCode::IM_A_TEAPOT,
            "text/plain",
            "stubbed",
        )))
    });

    let response = common::proxy_client(port)
        .get(format!("http://127.0.0.1:{port_without_origin}/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 418);
    assert_eq!(response.text().await.unwrap(), "stubbed");
    proxy.stop().await;
}

#[tokio::test]
async fn hook_can_redirect_upstream() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let origin_port = origin.port();
    proxy.hooks().on_before_request("reroute", move |ctx| {
        ctx.set_upstream("127.0.0.1", origin_port);
        Ok(Action::Continue)
    });

    let body = common::proxy_client(port)
        .get("http://unresolvable.invalid/path")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("GET http://unresolvable.invalid/path HTTP/1.1\r\n"));
    proxy.stop().await;
}

#[tokio::test]
async fn chunked_response_streams_through() {
    let origin = common::start_programmable_backend(|_| async {
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec()
    })
    .await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;

    let body = common::proxy_client(port)
        .get(format!("http://{origin}/chunks"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello world");
    proxy.stop().await;
}

#[tokio::test]
async fn buffered_response_can_be_rewritten() {
    let origin = common::start_html_backend("<p>original</p>", false).await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let hooks = proxy.hooks();
    hooks.on_before_request("buffer", |ctx| {
        ctx.set_buffer_response(true);
        Ok(Action::Continue)
    });
    hooks.on_before_response("rewrite", |ctx| {
        let patched = ctx.replace_once(b"original", b"patched")?;
        if !patched {
            return Err(HookError::failed("marker missing"));
        }
        Ok(Action::Continue)
    });

    let body = common::proxy_client(port)
        .get(format!("http://{origin}/p"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "<p>patched</p>");
    proxy.stop().await;
}

#[tokio::test]
async fn failing_hook_only_fails_its_session() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    proxy.hooks().on_before_request("flaky", move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(HookError::failed("first call fails"))
        } else {
            Ok(Action::Continue)
        }
    });
    let client = common::proxy_client(port);
    let url = format!("http://{origin}/flaky");

    let failed = client.get(&url).send().await.unwrap();
    assert_eq!(failed.status(), 500);
    assert!(failed.text().await.unwrap().contains("flaky"));

    let ok = client.get(&url).send().await.unwrap();
    assert_eq!(ok.status(), 200);
    assert!(proxy.is_running().await);
    proxy.stop().await;
}

#[tokio::test]
async fn completion_event_reports_status() {
    let origin = common::start_programmable_backend(|_| async {
        common::response("404 Not Found", &[], b"missing")
    })
    .await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let mut events = proxy.subscribe();

    let response = common::proxy_client(port)
        .get(format!("http://{origin}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let summary = wait_for(&mut events, |s| s.url.ends_with("/missing"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(summary.status, Some(StatusCode::NOT_FOUND));
    assert_eq!(summary.outcome, SessionOutcome::Completed);
    proxy.stop().await;
}

#[tokio::test]
async fn scoped_hooks_removed_on_drop() {
    let origin = common::start_echo_backend().await;
    let (proxy, port) = common::start_proxy(InterceptorConfig::default()).await;
    let hooks = proxy.hooks();
    let client = common::proxy_client(port);
    let url = format!("http://{origin}/scoped");

    {
        let mut scope = hooks.scope();
        scope.on_before_request("scoped", |ctx| {
            ctx.request_mut().headers_mut().set("X-Scoped", "1");
            Ok(Action::Continue)
        });
        let body = client.get(&url).send().await.unwrap().text().await.unwrap();
        assert!(body.contains("X-Scoped: 1"));
    }

    assert!(hooks.is_empty());
    let body = client.get(&url).send().await.unwrap().text().await.unwrap();
    assert!(!body.contains("X-Scoped"));
    proxy.stop().await;
}

#[tokio::test]
async fn admin_api_requires_bearer_key() {
    let mut config = InterceptorConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = "test-key".into();
    config.admin.bind_address = "127.0.0.1:0".into();
    let (proxy, _port) = common::start_proxy(config).await;
    proxy.hooks().register_before_request(Arc::new(BasicAuth::new("a", "b")));
    let admin = proxy.admin_address().await.unwrap();
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("http://{admin}/admin/hooks"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let listing: serde_json::Value = client
        .get(format!("http://{admin}/admin/hooks"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["before_request"], serde_json::json!(["basic-auth"]));
    assert_eq!(listing["before_response"], serde_json::json!([]));
    proxy.stop().await;
}
