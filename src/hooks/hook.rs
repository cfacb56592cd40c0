//! Hook traits and outcomes.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::DecodeError;
use crate::hooks::context::{RequestContext, ResponseContext};
use crate::http::Response;

/// What a handler wants the engine to do next.
#[derive(Debug)]
pub enum Action {
    /// Run the next handler in the phase.
    Continue,
    /// Stop this phase and use the supplied response.
    ///
    /// In the before-request phase the upstream is never contacted; the
    /// response goes straight to the before-response phase. In the
    /// before-response phase it replaces the current response.
    ShortCircuit(Response),
}

/// Error raised by a handler. Aborts only the session being dispatched.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        HookError::Failed(message.into())
    }
}

/// Handler for the before-request phase.
#[async_trait]
pub trait RequestHook: Send + Sync {
    /// Name used in logs and the admin listing.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn before_request(&self, ctx: &mut RequestContext<'_>) -> Result<Action, HookError>;
}

/// Handler for the before-response phase.
///
/// Only runs for sessions whose response was buffered.
#[async_trait]
pub trait ResponseHook: Send + Sync {
    /// Name used in logs and the admin listing.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn before_response(&self, ctx: &mut ResponseContext<'_>) -> Result<Action, HookError>;
}

/// Adapts a synchronous closure into a [`RequestHook`].
pub struct FnRequestHook<F> {
    name: String,
    f: F,
}

impl<F> FnRequestHook<F>
where
    F: Fn(&mut RequestContext<'_>) -> Result<Action, HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> RequestHook for FnRequestHook<F>
where
    F: Fn(&mut RequestContext<'_>) -> Result<Action, HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_request(&self, ctx: &mut RequestContext<'_>) -> Result<Action, HookError> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnRequestHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRequestHook").field("name", &self.name).finish()
    }
}

/// Adapts a synchronous closure into a [`ResponseHook`].
pub struct FnResponseHook<F> {
    name: String,
    f: F,
}

impl<F> FnResponseHook<F>
where
    F: Fn(&mut ResponseContext<'_>) -> Result<Action, HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> ResponseHook for FnResponseHook<F>
where
    F: Fn(&mut ResponseContext<'_>) -> Result<Action, HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_response(&self, ctx: &mut ResponseContext<'_>) -> Result<Action, HookError> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnResponseHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnResponseHook").field("name", &self.name).finish()
    }
}
