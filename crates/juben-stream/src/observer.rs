//! Caller-facing callbacks.

use crate::{connection::ConnectionState, event::Metadata, heartbeat::HeartbeatState};

/// Receives lifecycle notifications from a [`StreamClient`](crate::client::StreamClient).
///
/// Callbacks run on the driver task, in event order, and must not block.
/// After [`stop`](crate::client::StreamClient::stop) returns none of them is
/// invoked again for that run.
///
/// Per run, exactly one of [`on_complete`](Self::on_complete) and
/// [`on_error`](Self::on_error) fires unless the run is cancelled or its
/// reconnect budget runs out (reported as
/// [`ConnectionState::Disconnected`] only).
pub trait StreamObserver: Send + Sync + 'static {
    /// The run started.
    fn on_start(&self) {}

    /// Text changed. `text` is the full accumulated text so far.
    fn on_update(&self, _text: &str, _metadata: &Metadata) {}

    /// The stream finished normally.
    fn on_complete(&self, _text: &str, _metadata: &Metadata) {}

    /// The run failed for good.
    fn on_error(&self, _message: &str) {}

    fn on_connection_change(&self, _state: ConnectionState) {}

    fn on_heartbeat(&self, _state: HeartbeatState) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
