use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::hooks::context::RequestContext;
use crate::hooks::hook::{Action, HookError, RequestHook};

/// Sets `Authorization: Basic …` on every request.
///
/// Any `Authorization` header the client sent is replaced.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    header_value: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self {
            header_value: format!("Basic {encoded}"),
        }
    }

    /// Parse `user:pass`. The password may itself contain colons.
    pub fn from_credentials(credentials: &str) -> Option<Self> {
        let (username, password) = credentials.split_once(':')?;
        Some(Self::new(username, password))
    }

    pub fn header_value(&self) -> &str {
        &self.header_value
    }
}

#[async_trait]
impl RequestHook for BasicAuth {
    fn name(&self) -> &str {
        "basic-auth"
    }

    async fn before_request(&self, ctx: &mut RequestContext<'_>) -> Result<Action, HookError> {
        ctx.request_mut()
            .headers_mut()
            .set("Authorization", self.header_value.clone());
        Ok(Action::Continue)
    }
}
