//! Ordered, copy-on-write hook registry.
//!
//! # Responsibilities
//! - Keep before-request and before-response handlers in registration order
//! - Hand out tokens for removal, and scope guards that remove on drop
//! - Dispatch one phase of one session against an atomic snapshot
//!
//! # Design Decisions
//! - Each phase is an `ArcSwap<Vec<_>>`. Writers rebuild the list with
//!   `rcu`; dispatch takes `load_full` once at phase start and iterates
//!   that, so no lock is held while handler code runs
//! - A handler removed mid-phase still runs for the phase that already
//!   holds it; a handler added mid-phase waits for the next phase
//! - Order is the insertion sequence and is never recomputed

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::error::ProxyError;
use crate::hooks::context::{RequestContext, ResponseContext};
use crate::hooks::hook::{
    Action, FnRequestHook, FnResponseHook, HookError, RequestHook, ResponseHook,
};
use crate::http::Response;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;
use crate::proxy::session::Session;

/// Dispatch point a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeRequest,
    BeforeResponse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeRequest => "before_request",
            Phase::BeforeResponse => "before_response",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken {
    phase: Phase,
    seq: u64,
}

impl HookToken {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Insertion sequence; lower numbers run first.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct Registration<H: ?Sized> {
    seq: u64,
    once: bool,
    fired: AtomicBool,
    hook: Arc<H>,
}

impl<H: ?Sized> Registration<H> {
    /// A one-shot handler is claimed by exactly one session.
    fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }
}

type Slots<H> = ArcSwap<Vec<Arc<Registration<H>>>>;

/// Registry shared by every connection task.
pub struct HookRegistry {
    next_seq: AtomicU64,
    request: Slots<dyn RequestHook>,
    response: Slots<dyn ResponseHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            request: ArcSwap::from_pointee(Vec::new()),
            response: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register_before_request(&self, hook: Arc<dyn RequestHook>) -> HookToken {
        self.insert_request(hook, false)
    }

    pub fn register_before_response(&self, hook: Arc<dyn ResponseHook>) -> HookToken {
        self.insert_response(hook, false)
    }

    /// Register a handler that runs for the next session only.
    pub fn register_before_request_once(&self, hook: Arc<dyn RequestHook>) -> HookToken {
        self.insert_request(hook, true)
    }

    /// Register a handler that runs for the next buffered response only.
    pub fn register_before_response_once(&self, hook: Arc<dyn ResponseHook>) -> HookToken {
        self.insert_response(hook, true)
    }

    /// Register a closure as a before-request handler.
    pub fn on_before_request<F>(&self, name: impl Into<String>, f: F) -> HookToken
    where
        F: Fn(&mut RequestContext<'_>) -> Result<Action, HookError> + Send + Sync + 'static,
    {
        self.register_before_request(Arc::new(FnRequestHook::new(name, f)))
    }

    /// Register a closure as a before-response handler.
    pub fn on_before_response<F>(&self, name: impl Into<String>, f: F) -> HookToken
    where
        F: Fn(&mut ResponseContext<'_>) -> Result<Action, HookError> + Send + Sync + 'static,
    {
        self.register_before_response(Arc::new(FnResponseHook::new(name, f)))
    }

    /// Remove a handler. Returns false if the token was already removed.
    pub fn unregister(&self, token: HookToken) -> bool {
        match token.phase {
            Phase::BeforeRequest => remove(&self.request, token.seq),
            Phase::BeforeResponse => remove(&self.response, token.seq),
        }
    }

    /// Handler names for a phase, in dispatch order.
    pub fn names(&self, phase: Phase) -> Vec<String> {
        match phase {
            Phase::BeforeRequest => self
                .request
                .load()
                .iter()
                .map(|r| r.hook.name().to_string())
                .collect(),
            Phase::BeforeResponse => self
                .response
                .load()
                .iter()
                .map(|r| r.hook.name().to_string())
                .collect(),
        }
    }

    pub fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::BeforeRequest => self.request.load().len(),
            Phase::BeforeResponse => self.response.load().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len(Phase::BeforeRequest) == 0 && self.len(Phase::BeforeResponse) == 0
    }

    /// Guard that unregisters everything registered through it when dropped.
    pub fn scope(self: &Arc<Self>) -> HookScope {
        HookScope {
            registry: Arc::clone(self),
            tokens: Vec::new(),
        }
    }

    /// Run the before-request phase.
    ///
    /// Returns the synthetic response of a short-circuiting handler, if any.
    pub(crate) async fn dispatch_request(
        &self,
        session: &mut Session,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<Response>, ProxyError> {
        let snapshot = self.request.load_full();
        for registration in snapshot.iter() {
            if shutdown.is_triggered() {
                return Err(ProxyError::ShuttingDown);
            }
            if !registration.claim() {
                continue;
            }
            if registration.once {
                remove(&self.request, registration.seq);
            }

            let hook = &registration.hook;
            let mut ctx = RequestContext::new(session);
            match hook.before_request(&mut ctx).await {
                Ok(Action::Continue) => {}
                Ok(Action::ShortCircuit(response)) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        hook = hook.name(),
                        status = response.status().as_u16(),
                        "Request short-circuited"
                    );
                    return Ok(Some(response));
                }
                Err(source) => {
                    metrics::record_hook_failure(Phase::BeforeRequest);
                    return Err(ProxyError::HandlerFailure {
                        hook: hook.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(None)
    }

    /// Run the before-response phase against a buffered response.
    pub(crate) async fn dispatch_response(
        &self,
        session: &mut Session,
        response: &mut Response,
        shutdown: &ShutdownSignal,
    ) -> Result<(), ProxyError> {
        let snapshot = self.response.load_full();
        for registration in snapshot.iter() {
            if shutdown.is_triggered() {
                return Err(ProxyError::ShuttingDown);
            }
            if !registration.claim() {
                continue;
            }
            if registration.once {
                remove(&self.response, registration.seq);
            }

            let hook = &registration.hook;
            let mut ctx = ResponseContext::new(session, response);
            match hook.before_response(&mut ctx).await {
                Ok(Action::Continue) => {}
                Ok(Action::ShortCircuit(replacement)) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        hook = hook.name(),
                        status = replacement.status().as_u16(),
                        "Response replaced"
                    );
                    *response = replacement;
                    return Ok(());
                }
                Err(source) => {
                    metrics::record_hook_failure(Phase::BeforeResponse);
                    return Err(ProxyError::HandlerFailure {
                        hook: hook.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn insert_request(&self, hook: Arc<dyn RequestHook>, once: bool) -> HookToken {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(hook = hook.name(), seq, once, "Registered before-request hook");
        insert(&self.request, Registration { seq, once, fired: AtomicBool::new(false), hook });
        HookToken { phase: Phase::BeforeRequest, seq }
    }

    fn insert_response(&self, hook: Arc<dyn ResponseHook>, once: bool) -> HookToken {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(hook = hook.name(), seq, once, "Registered before-response hook");
        insert(&self.response, Registration { seq, once, fired: AtomicBool::new(false), hook });
        HookToken { phase: Phase::BeforeResponse, seq }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_request", &self.names(Phase::BeforeRequest))
            .field("before_response", &self.names(Phase::BeforeResponse))
            .finish()
    }
}

fn insert<H: ?Sized>(slots: &Slots<H>, registration: Registration<H>) {
    // Sequence numbers are taken before the swap, so two racing writers may
    // land out of order; sorting keeps dispatch in insertion order.
    let registration = Arc::new(registration);
    slots.rcu(|current| {
        let mut next: Vec<_> = current.iter().cloned().collect();
        next.push(Arc::clone(&registration));
        next.sort_by_key(|r| r.seq);
        next
    });
}

fn remove<H: ?Sized>(slots: &Slots<H>, seq: u64) -> bool {
    let mut removed = false;
    slots.rcu(|current| {
        removed = current.iter().any(|r| r.seq == seq);
        current
            .iter()
            .filter(|r| r.seq != seq)
            .cloned()
            .collect::<Vec<_>>()
    });
    removed
}

/// Registrations that live as long as this guard.
///
/// ```ignore
/// let scope = registry.scope();
/// scope.on_before_request("auth", |ctx| { /* ... */ Ok(Action::Continue) });
/// // navigate, wait for the response ...
/// drop(scope); // handlers removed
/// ```
pub struct HookScope {
    registry: Arc<HookRegistry>,
    tokens: Vec<HookToken>,
}

impl HookScope {
    pub fn register_before_request(&mut self, hook: Arc<dyn RequestHook>) -> HookToken {
        let token = self.registry.register_before_request(hook);
        self.tokens.push(token);
        token
    }

    pub fn register_before_response(&mut self, hook: Arc<dyn ResponseHook>) -> HookToken {
        let token = self.registry.register_before_response(hook);
        self.tokens.push(token);
        token
    }

    pub fn on_before_request<F>(&mut self, name: impl Into<String>, f: F) -> HookToken
    where
        F: Fn(&mut RequestContext<'_>) -> Result<Action, HookError> + Send + Sync + 'static,
    {
        self.register_before_request(Arc::new(FnRequestHook::new(name, f)))
    }

    pub fn on_before_response<F>(&mut self, name: impl Into<String>, f: F) -> HookToken
    where
        F: Fn(&mut ResponseContext<'_>) -> Result<Action, HookError> + Send + Sync + 'static,
    {
        self.register_before_response(Arc::new(FnResponseHook::new(name, f)))
    }

    pub fn tokens(&self) -> &[HookToken] {
        &self.tokens
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.registry.unregister(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::lifecycle::shutdown::Shutdown;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::time::Duration;
    use tokio::sync::{oneshot, Mutex};

    fn session() -> Session {
        let request = Request::parse(b"GET http://example.com/ HTTP/1.1\r\n\r\n").unwrap();
        Session::new("127.0.0.1:1000".parse().unwrap(), request)
    }

    fn marker(registry: &HookRegistry, tag: &'static str) -> HookToken {
        registry.on_before_request(tag, move |ctx| {
            ctx.request_mut().headers_mut().append("X-Order", tag);
            Ok(Action::Continue)
        })
    }

    fn order(session: &Session) -> Option<String> {
        session.request().headers().combined("x-order")
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        marker(&registry, "H1");
        marker(&registry, "H2");

        for _ in 0..3 {
            let mut s = session();
            registry.dispatch_request(&mut s, &shutdown.subscribe()).await.unwrap();
            assert_eq!(order(&s).as_deref(), Some("H1,H2"));
        }
    }

    #[tokio::test]
    async fn unregister_removes_once() {
        let registry = HookRegistry::new();
        let token = marker(&registry, "H1");
        assert_eq!(registry.len(Phase::BeforeRequest), 1);
        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(registry.is_empty());
    }

    /// Blocks until released, so a registration can race an in-flight phase.
    struct Gate {
        entered: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl RequestHook for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn before_request(&self, _ctx: &mut RequestContext<'_>) -> Result<Action, HookError> {
            if let Some(tx) = self.entered.lock().await.take() {
                let _ = tx.send(());
            }
            let rx = self.release.lock().await.take();
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(Action::Continue)
        }
    }

    #[tokio::test]
    async fn snapshot_isolation() {
        let registry = Arc::new(HookRegistry::new());
        let shutdown = Shutdown::new();
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        registry.register_before_request(Arc::new(Gate {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        }));

        let signal = shutdown.subscribe();
        let in_flight = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let mut s = session();
                registry.dispatch_request(&mut s, &signal).await.unwrap();
                s
            })
        };

        entered_rx.await.unwrap();
        marker(&registry, "H3");
        release_tx.send(()).unwrap();

        let first = in_flight.await.unwrap();
        assert_eq!(order(&first), None);

        let mut next = session();
        registry.dispatch_request(&mut next, &shutdown.subscribe()).await.unwrap();
        assert_eq!(order(&next).as_deref(), Some("H3"));
    }

    #[tokio::test]
    async fn once_handler_fires_for_one_session() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        registry.register_before_request_once(Arc::new(FnRequestHook::new("once", |ctx| {
            ctx.request_mut().headers_mut().append("X-Order", "once");
            Ok(Action::Continue)
        })));

        let mut a = session();
        let mut b = session();
        registry.dispatch_request(&mut a, &shutdown.subscribe()).await.unwrap();
        registry.dispatch_request(&mut b, &shutdown.subscribe()).await.unwrap();
        assert_eq!(order(&a).as_deref(), Some("once"));
        assert_eq!(order(&b), None);
        assert_eq!(registry.len(Phase::BeforeRequest), 0);
    }

    #[test]
    fn scope_unregisters_on_drop() {
        let registry = Arc::new(HookRegistry::new());
        marker(&registry, "kept");
        {
            let mut scope = registry.scope();
            scope.on_before_request("scoped", |_| Ok(Action::Continue));
            scope.on_before_response("scoped", |_| Ok(Action::Continue));
            assert_eq!(scope.tokens().len(), 2);
            assert_eq!(registry.names(Phase::BeforeRequest), vec!["kept", "scoped"]);
        }
        assert_eq!(registry.names(Phase::BeforeRequest), vec!["kept"]);
        assert_eq!(registry.len(Phase::BeforeResponse), 0);
    }

    #[tokio::test]
    async fn short_circuit_stops_phase() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        registry.on_before_request("deny", |_| {
            Ok(Action::ShortCircuit(Response::local_error(StatusCode::FORBIDDEN, "denied")))
        });
        marker(&registry, "never");

        let mut s = session();
        let response = registry
            .dispatch_request(&mut s, &shutdown.subscribe())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(order(&s), None);
    }

    #[tokio::test]
    async fn handler_error_names_hook() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        registry.on_before_request("broken", |_| Err(HookError::failed("boom")));

        let mut s = session();
        let err = registry
            .dispatch_request(&mut s, &shutdown.subscribe())
            .await
            .unwrap_err();
        match err {
            ProxyError::HandlerFailure { hook, .. } => assert_eq!(hook, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn response_phase_can_replace_response() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        registry.on_before_response("rewrite", |ctx| {
            ctx.response_mut().set_body_text("patched");
            Ok(Action::Continue)
        });
        registry.on_before_response("replace", |ctx| {
            let body = format!("was: {}", ctx.response().body_text());
            Ok(Action::ShortCircuit(Response::synthetic(StatusCode::OK, "text/plain", body)))
        });

        let mut s = session();
        let mut response = Response::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc").unwrap();
        registry
            .dispatch_response(&mut s, &mut response, &shutdown.subscribe())
            .await
            .unwrap();
        assert_eq!(response.body().as_bytes(), b"was: patched");
    }

    #[tokio::test]
    async fn no_hook_fires_after_shutdown() {
        let registry = HookRegistry::new();
        let shutdown = Shutdown::new();
        marker(&registry, "H1");
        shutdown.trigger();

        let mut s = session();
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            registry.dispatch_request(&mut s, &shutdown.subscribe()),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, ProxyError::ShuttingDown));
        assert_eq!(order(&s), None);
    }
}
