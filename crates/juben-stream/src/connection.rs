//! Connection state machine.
//!
//! [`ConnectionController`] is the only writer of [`ConnectionStatus`]. Each
//! method performs at most one edge of the state machine, so the caller can
//! report every state it passes through:
//!
//! ```text
//! Idle ──start──▶ Connecting ──opened──▶ Connected ──complete/stop──▶ Disconnected
//!                   │    ▲                  │
//!                 fail   └──retry──┐        ├─transport lost / heartbeat─┐
//!                   ▼              │        ▼                            │
//!                 Error ──────▶ Reconnecting ◀────────────────────────────┘
//!                                  │
//!                                  └─attempts exhausted──▶ Disconnected
//! ```
//!
//! `reset` returns any state to `Idle`.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    error::{StreamError, StreamResult},
    reconnect::{BackoffConfig, calculate_backoff},
};

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// `Connecting`, `Connected` and `Reconnecting` hold (or are about to
    /// hold) a transport.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Error, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnection attempts since the last successful connect.
    pub attempt: u32,
    /// Wall-clock time of the last received chunk or successful probe.
    pub last_activity: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of entering `Reconnecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Wait `delay`, then call [`ConnectionController::retry`].
    Retry { attempt: u32, delay: Duration },
    /// The attempt budget is spent; call [`ConnectionController::give_up`].
    Exhausted { attempts: u32 },
}

/// Owner of the connection state machine and reconnect policy.
#[derive(Debug)]
pub struct ConnectionController {
    status: ConnectionStatus,
    backoff: BackoffConfig,
    max_attempts: u32,
    auto_reconnect: bool,
    last_activity: Instant,
    snapshots: watch::Sender<ConnectionStatus>,
}

impl ConnectionController {
    pub fn new(backoff: BackoffConfig, max_attempts: u32, auto_reconnect: bool) -> Self {
        let (snapshots, _) = watch::channel(ConnectionStatus::default());
        Self::with_sender(backoff, max_attempts, auto_reconnect, snapshots)
    }

    /// Create a controller publishing into an existing channel.
    pub fn with_sender(
        backoff: BackoffConfig,
        max_attempts: u32,
        auto_reconnect: bool,
        snapshots: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let status = ConnectionStatus::default();
        snapshots.send_replace(status.clone());
        Self {
            status,
            backoff,
            max_attempts,
            auto_reconnect,
            last_activity: Instant::now(),
            snapshots,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    pub fn attempt(&self) -> u32 {
        self.status.attempt
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.snapshots.subscribe()
    }

    /// `Idle → Connecting`. A finished controller is reset first.
    pub fn start(&mut self) -> StreamResult<()> {
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            self.reset();
        }
        self.transition(ConnectionState::Connecting)
    }

    /// `Connecting → Connected`; clears the attempt counter.
    pub fn opened(&mut self) -> StreamResult<()> {
        self.transition(ConnectionState::Connected)?;
        self.status.attempt = 0;
        self.status.last_error = None;
        self.touch();
        self.publish();
        Ok(())
    }

    /// `Connecting → Error` when the transport could not be opened.
    pub fn fail(&mut self, error: &StreamError) -> StreamResult<()> {
        if !self.state().can_transition_to(ConnectionState::Error) {
            return Err(self.invalid(ConnectionState::Error));
        }
        self.status.last_error = Some(error.to_string());
        self.transition(ConnectionState::Error)
    }

    /// `Error → Reconnecting` or `Connected → Reconnecting`.
    ///
    /// Bumps the attempt counter and decides whether another attempt is
    /// allowed. The controller stays in `Reconnecting` either way.
    pub fn begin_reconnect(&mut self, reason: &str) -> StreamResult<Recovery> {
        self.transition(ConnectionState::Reconnecting)?;
        self.status.attempt = self.status.attempt.saturating_add(1);
        let attempt = self.status.attempt;
        if self.status.last_error.is_none() {
            self.status.last_error = Some(reason.to_string());
        }
        self.publish();

        if attempt > self.max_attempts {
            warn!(
                attempts = self.max_attempts,
                reason, "Reconnect attempts exhausted"
            );
            return Ok(Recovery::Exhausted {
                attempts: self.max_attempts,
            });
        }

        let delay = calculate_backoff(self.backoff, attempt);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Reconnecting after backoff"
        );
        Ok(Recovery::Retry { attempt, delay })
    }

    /// `Reconnecting → Connecting` once the backoff delay has elapsed.
    pub fn retry(&mut self) -> StreamResult<()> {
        if self.state() != ConnectionState::Reconnecting {
            return Err(self.invalid(ConnectionState::Connecting));
        }
        self.transition(ConnectionState::Connecting)
    }

    /// `Reconnecting → Disconnected`; terminal for the session.
    pub fn give_up(&mut self) -> StreamResult<()> {
        if self.state() != ConnectionState::Reconnecting {
            return Err(self.invalid(ConnectionState::Disconnected));
        }
        self.transition(ConnectionState::Disconnected)
    }

    /// `Connected → Disconnected` on a normal terminal event.
    pub fn complete(&mut self) -> StreamResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(self.invalid(ConnectionState::Disconnected));
        }
        self.transition(ConnectionState::Disconnected)
    }

    /// `Connected → Disconnected` when the transport drops and no reconnect
    /// will follow.
    pub fn lose(&mut self, error: &StreamError) -> StreamResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(self.invalid(ConnectionState::Disconnected));
        }
        self.status.last_error = Some(error.to_string());
        self.transition(ConnectionState::Disconnected)
    }

    /// Move any live or failed connection to `Disconnected`.
    ///
    /// Cancellation overrides the edge table: this is the only way out of
    /// `Connecting` or `Error` other than the documented edges.
    ///
    /// Returns `false` (and changes nothing) from `Idle` or `Disconnected`.
    pub fn stop(&mut self) -> bool {
        match self.state() {
            ConnectionState::Idle | ConnectionState::Disconnected => false,
            _ => {
                info!(from = %self.state(), "Connection stopped");
                self.set_state(ConnectionState::Disconnected);
                true
            }
        }
    }

    /// Any state → `Idle`, clearing the attempt counter and last error.
    pub fn reset(&mut self) {
        self.status = ConnectionStatus::default();
        self.last_activity = Instant::now();
        self.publish();
    }

    /// Record inbound activity.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        let now = Utc::now();
        self.status.last_activity = Some(now);
        // Readers see the new timestamp without being woken for every chunk.
        self.snapshots.send_if_modified(|status| {
            status.last_activity = Some(now);
            false
        });
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn transition(&mut self, to: ConnectionState) -> StreamResult<()> {
        let from = self.state();
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Rejected connection transition");
            return Err(StreamError::InvalidTransition { from, to });
        }
        debug!(%from, %to, attempt = self.status.attempt, "Connection transition");
        self.set_state(to);
        Ok(())
    }

    fn invalid(&self, to: ConnectionState) -> StreamError {
        let from = self.state();
        warn!(%from, %to, "Rejected connection transition");
        StreamError::InvalidTransition { from, to }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.status.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.status.clone());
    }
}
