//! Session completion events.
//!
//! Every session publishes one [`SessionSummary`] once its response has
//! been relayed, or once it was aborted. Callers use it to learn that a
//! navigation has actually finished on the wire before tearing down the
//! hooks they registered for it.

use std::time::Duration;

use http::{Method, StatusCode};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::proxy::session::SessionId;

/// Summaries kept for slow subscribers before they start lagging.
const EVENT_CAPACITY: usize = 256;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The upstream response was relayed.
    Completed,
    /// A before-request hook supplied the response.
    ShortCircuited,
    /// CONNECT or protocol upgrade turned into a byte tunnel.
    Tunnelled,
    /// The session failed; a local error response was sent if possible.
    Failed,
    /// Shutdown began before the session's hooks finished.
    Aborted,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::ShortCircuited => "short_circuited",
            SessionOutcome::Tunnelled => "tunnelled",
            SessionOutcome::Failed => "failed",
            SessionOutcome::Aborted => "aborted",
        }
    }
}

/// What a finished session looked like from the client's side.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub method: Method,
    pub url: String,
    /// Status relayed to the client, if a response was sent.
    pub status: Option<StatusCode>,
    pub outcome: SessionOutcome,
    pub elapsed: Duration,
    /// Failure description for `Failed` and `Aborted` sessions.
    pub error: Option<String>,
}

/// Fan-out of session summaries.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionSummary>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSummary> {
        self.tx.subscribe()
    }

    /// Publish a summary. Dropped silently when nobody listens.
    pub fn publish(&self, summary: SessionSummary) {
        let _ = self.tx.send(summary);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive summaries until one matches `predicate`.
///
/// Returns `None` on timeout or once the publisher is gone. Summaries lost
/// to lagging are skipped.
pub async fn wait_for<P>(
    rx: &mut broadcast::Receiver<SessionSummary>,
    mut predicate: P,
    timeout: Duration,
) -> Option<SessionSummary>
where
    P: FnMut(&SessionSummary) -> bool,
{
    let search = async {
        loop {
            match rx.recv().await {
                Ok(summary) if predicate(&summary) => return Some(summary),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, search).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(url: &str) -> SessionSummary {
        SessionSummary {
            id: SessionId::new(),
            method: Method::GET,
            url: url.to_string(),
            status: Some(StatusCode::OK),
            outcome: SessionOutcome::Completed,
            elapsed: Duration::from_millis(3),
            error: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        events.publish(summary("http://a/1"));
        events.publish(summary("http://a/2"));
        assert_eq!(rx.recv().await.unwrap().url, "http://a/1");
        assert_eq!(rx.recv().await.unwrap().url, "http://a/2");
    }

    #[tokio::test]
    async fn wait_for_skips_non_matching() {
        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        events.publish(summary("http://a/favicon.ico"));
        events.publish(summary("http://a/page"));

        let found = wait_for(&mut rx, |s| s.url.ends_with("/page"), Duration::from_secs(1)).await;
        assert_eq!(found.unwrap().url, "http://a/page");

        let none = wait_for(&mut rx, |_| true, Duration::from_millis(20)).await;
        assert!(none.is_none());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        SessionEvents::new().publish(summary("http://a/"));
    }
}
