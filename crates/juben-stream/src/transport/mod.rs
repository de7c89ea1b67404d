//! Backend seams: opening streams, probing liveness, and session control.
//!
//! The client only talks to the backend through these traits, so tests (and
//! alternative backends) can script every byte the pipeline sees.
//! [`HttpTransport`] implements all three over `reqwest`.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::{error::StreamResult, request::StreamRequest, session::SessionMessage};

mod http;
mod wire;

pub use self::{
    http::HttpTransport,
    wire::{
        HealthReport, HistoryMessage, SessionDescriptor, StartSessionRequest, endpoint_for,
    },
};

/// Raw body of an open stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamResult<Bytes>> + Send>>;

/// Opens the byte stream for one request.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Send `request` and return the response body once the backend has
    /// accepted it (2xx). Each call is an independent connection.
    async fn open(&self, request: &StreamRequest) -> StreamResult<ByteStream>;
}

/// Lightweight out-of-band liveness check.
#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    async fn probe(&self, session_id: &str, user_id: &str) -> StreamResult<HealthReport>;
}

/// Multi-agent session management.
#[async_trait]
pub trait SessionControl: Send + Sync + 'static {
    async fn start_session(&self, request: &StartSessionRequest) -> StreamResult<SessionDescriptor>;

    async fn stop_session(&self, session_id: &str) -> StreamResult<()>;

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        target: Option<&str>,
    ) -> StreamResult<()>;

    async fn session_history(&self, session_id: &str) -> StreamResult<Vec<SessionMessage>>;
}
