//! `reqwest` implementation of the backend seams.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use http::{HeaderValue, header};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{
    ByteStream, LivenessProbe, SessionControl, StreamTransport,
    wire::{
        ChatBody, HealthReport, HistoryMessage, SendMessageBody, SessionDescriptor,
        StartSessionRequest, endpoint_for,
    },
};
use crate::{
    config::StreamConfig,
    error::{StreamError, StreamResult},
    request::StreamRequest,
    session::SessionMessage,
};

/// HTTP transport for the juben backend.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<StreamConfig>,
}

impl HttpTransport {
    /// Build a transport with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the client cannot
    /// be built.
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        config.validate().map_err(StreamError::config)?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Build a transport around an existing client.
    pub fn with_client(client: reqwest::Client, config: StreamConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

/// Turn a non-2xx response into [`StreamError::Api`].
async fn ensure_success(response: reqwest::Response) -> StreamResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            debug!(status = %status, error = %err, "Failed to read error response body");
            String::new()
        }
    };
    Err(StreamError::api(status, body))
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> StreamResult<ByteStream> {
        let url = self.config.endpoint(&endpoint_for(request.capability()));
        let body = ChatBody::new(request, &self.config.default_user_id);
        info!(url = %url, session_id = body.session_id, "Opening stream");

        let send = self
            .client
            .post(&url)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .json(&body)
            .send();
        let response = timeout(self.config.connect_timeout, send)
            .await
            .map_err(|_| StreamError::timeout(self.config.connect_timeout))??;
        let response = ensure_success(response).await?;

        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            debug!(content_type = ?content_type, "Stream accepted");
        }

        Ok(Box::pin(response.bytes_stream().map_err(StreamError::from)))
    }
}

#[async_trait]
impl LivenessProbe for HttpTransport {
    async fn probe(&self, session_id: &str, user_id: &str) -> StreamResult<HealthReport> {
        debug!(session_id, user_id, "Probing backend liveness");
        let response = self
            .client
            .get(self.config.endpoint("/health"))
            .send()
            .await?;
        let report = ensure_success(response)
            .await?
            .json::<HealthReport>()
            .await?;
        Ok(report)
    }
}

#[async_trait]
impl SessionControl for HttpTransport {
    async fn start_session(&self, request: &StartSessionRequest) -> StreamResult<SessionDescriptor> {
        let response = self
            .client
            .post(self.config.endpoint("/agents/start-session"))
            .json(request)
            .send()
            .await?;
        let descriptor = ensure_success(response)
            .await?
            .json::<SessionDescriptor>()
            .await?;
        info!(
            session_id = %descriptor.session_id,
            project_id = %request.project_id,
            "Agent session started"
        );
        Ok(descriptor)
    }

    async fn stop_session(&self, session_id: &str) -> StreamResult<()> {
        let response = self
            .client
            .post(
                self.config
                    .endpoint(&format!("/agents/stop-session/{session_id}")),
            )
            .send()
            .await?;
        ensure_success(response).await?;
        info!(session_id, "Agent session stopped");
        Ok(())
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        target: Option<&str>,
    ) -> StreamResult<()> {
        let body = SendMessageBody {
            session_id,
            message,
            target_agent: target,
        };
        let response = self
            .client
            .post(self.config.endpoint("/agents/send-message"))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        debug!(session_id, target = ?target, "Message sent");
        Ok(())
    }

    async fn session_history(&self, session_id: &str) -> StreamResult<Vec<SessionMessage>> {
        let response = self
            .client
            .get(
                self.config
                    .endpoint(&format!("/agents/session/{session_id}/history")),
            )
            .send()
            .await?;
        let history = ensure_success(response)
            .await?
            .json::<Vec<HistoryMessage>>()
            .await?;
        Ok(history.into_iter().map(SessionMessage::from).collect())
    }
}
