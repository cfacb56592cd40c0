use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::bytes::Regex;

use crate::hooks::context::{RequestContext, ResponseContext};
use crate::hooks::hook::{Action, HookError, RequestHook, ResponseHook};
use crate::hooks::registry::{HookRegistry, HookScope, HookToken};

/// First `<head>` or `<head …>` tag, any case. `<header>` does not match.
static HEAD_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i-u)<head(?:[\s/][^>]*)?>").ok());

/// Inserts a `<script>` block right after the `<head>` tag of one page.
///
/// Acts as both halves of the pattern: the request half asks for the
/// target's response to be buffered and decoded, the response half patches
/// HTML responses for that URL. The block is only inserted if the body does
/// not already contain it, so repeated dispatch leaves a single copy.
#[derive(Debug, Clone)]
pub struct ScriptInjection {
    target_url: String,
    block: Vec<u8>,
}

impl ScriptInjection {
    /// Collects uncaught page errors into `window.__webdriver_javascript_errors`.
    pub const JS_ERROR_COLLECTOR: &'static str = "window.__webdriver_javascript_errors = []; \
        window.onerror = function(errorMsg, url, line) { \
        window.__webdriver_javascript_errors.push(errorMsg + ' (found at ' + url + ', line ' + line + ')'); };";

    pub fn new(target_url: impl Into<String>, script: &str) -> Self {
        Self {
            target_url: target_url.into(),
            block: format!("<script>{script}</script>").into_bytes(),
        }
    }

    /// Injection of [`Self::JS_ERROR_COLLECTOR`].
    pub fn js_errors(target_url: impl Into<String>) -> Self {
        Self::new(target_url, Self::JS_ERROR_COLLECTOR)
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Register both halves. Returns the request and response tokens.
    pub fn register(self: Arc<Self>, registry: &HookRegistry) -> (HookToken, HookToken) {
        let request = registry.register_before_request(Arc::clone(&self) as Arc<dyn RequestHook>);
        let response = registry.register_before_response(self);
        (request, response)
    }

    /// Register both halves inside a scope, removed when the scope drops.
    pub fn register_scoped(self: Arc<Self>, scope: &mut HookScope) -> (HookToken, HookToken) {
        let request = scope.register_before_request(Arc::clone(&self) as Arc<dyn RequestHook>);
        let response = scope.register_before_response(self);
        (request, response)
    }

    /// Insert the block after the first head tag of `html`.
    ///
    /// Returns `None` when there is no head tag or the block is already present.
    pub fn inject(&self, html: &[u8]) -> Option<Vec<u8>> {
        if contains(html, &self.block) {
            return None;
        }
        let tag = HEAD_TAG.as_ref()?.find(html)?;
        let mut out = Vec::with_capacity(html.len() + self.block.len());
        out.extend_from_slice(&html[..tag.end()]);
        out.extend_from_slice(&self.block);
        out.extend_from_slice(&html[tag.end()..]);
        Some(out)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[async_trait]
impl RequestHook for ScriptInjection {
    fn name(&self) -> &str {
        "script-injection"
    }

    async fn before_request(&self, ctx: &mut RequestContext<'_>) -> Result<Action, HookError> {
        if ctx.url() == self.target_url {
            ctx.set_decode_response(true);
        }
        Ok(Action::Continue)
    }
}

#[async_trait]
impl ResponseHook for ScriptInjection {
    fn name(&self) -> &str {
        "script-injection"
    }

    async fn before_response(&self, ctx: &mut ResponseContext<'_>) -> Result<Action, HookError> {
        if ctx.url() != self.target_url
            || !ctx.response().headers().contains_value("Content-Type", "html")
        {
            return Ok(Action::Continue);
        }
        let patched = self.inject(ctx.decoded_body()?);
        if let Some(body) = patched {
            tracing::debug!(session_id = %ctx.session_id(), url = ctx.url(), "Injected script");
            ctx.response_mut().set_body(body);
        }
        Ok(Action::Continue)
    }
}
