//! Input to a streaming operation.

use serde_json::Value;

use crate::event::Metadata;

/// Immutable description of one logical streaming turn.
///
/// Build with [`StreamRequest::builder`]. Correlation ids left unset are
/// filled in by the client from its own session id and configured user id.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    capability: Option<String>,
    payload: String,
    session_id: Option<String>,
    user_id: Option<String>,
    context: Metadata,
}

impl StreamRequest {
    /// Start building a request carrying `payload`.
    pub fn builder(payload: impl Into<String>) -> StreamRequestBuilder {
        StreamRequestBuilder {
            request: Self {
                capability: None,
                payload: payload.into(),
                session_id: None,
                user_id: None,
                context: Metadata::new(),
            },
        }
    }

    /// Target capability (agent) id, e.g. `"planner"`.
    pub fn capability(&self) -> Option<&str> {
        self.capability.as_deref()
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Free-form context flags.
    pub fn context(&self) -> &Metadata {
        &self.context
    }

    /// Boolean context flag; absent or non-boolean values read as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.context.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// String context value.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Copy with missing correlation ids filled in.
    pub(crate) fn correlated(&self, session_id: &str, user_id: &str) -> Self {
        let mut request = self.clone();
        request.session_id.get_or_insert_with(|| session_id.to_string());
        request.user_id.get_or_insert_with(|| user_id.to_string());
        request
    }
}

/// Builder for [`StreamRequest`].
#[derive(Clone, Debug)]
pub struct StreamRequestBuilder {
    request: StreamRequest,
}

impl StreamRequestBuilder {
    #[must_use]
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.request.capability = Some(capability.into());
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.request.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.request.user_id = Some(user_id.into());
        self
    }

    /// Set one context entry.
    #[must_use]
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.context.insert(key.into(), value.into());
        self
    }

    /// Shorthand for the `enable_web_search` flag.
    #[must_use]
    pub fn web_search(self, enabled: bool) -> Self {
        self.context("enable_web_search", enabled)
    }

    /// Shorthand for the `enable_knowledge_base` flag.
    #[must_use]
    pub fn knowledge_base(self, enabled: bool) -> Self {
        self.context("enable_knowledge_base", enabled)
    }

    /// Shorthand for the `model_provider` entry.
    #[must_use]
    pub fn model_provider(self, provider: impl Into<String>) -> Self {
        self.context("model_provider", provider.into())
    }

    pub fn build(self) -> StreamRequest {
        self.request
    }
}
