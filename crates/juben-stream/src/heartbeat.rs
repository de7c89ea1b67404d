//! Liveness monitoring for an established connection.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch,
    time::{Instant, Interval, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, warn};

use crate::transport::LivenessProbe;

/// Heartbeat state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatState {
    Active,
    #[default]
    Inactive,
    Error,
}

impl fmt::Display for HeartbeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        })
    }
}

/// Snapshot of the heartbeat.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub state: HeartbeatState,
    /// Time of the last successful probe.
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Result of a liveness check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// The probe succeeded; the connection should be treated as active.
    Alive,
    /// The probe failed or timed out; the connection should be recycled.
    Dead { reason: String },
}

/// Periodic idle check that only runs while the connection is `Connected`.
///
/// The monitor never touches the connection itself: it reports a
/// [`HeartbeatVerdict`] and the driver decides what to do with it.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    enabled: bool,
    interval: Duration,
    idle_timeout: Duration,
    probe_timeout: Duration,
    ticker: Option<Interval>,
    status: HeartbeatStatus,
    snapshots: watch::Sender<HeartbeatStatus>,
}

impl HeartbeatMonitor {
    pub fn new(
        enabled: bool,
        interval: Duration,
        idle_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(HeartbeatStatus::default());
        Self::with_sender(enabled, interval, idle_timeout, probe_timeout, snapshots)
    }

    /// Create a monitor publishing into an existing channel.
    pub fn with_sender(
        enabled: bool,
        interval: Duration,
        idle_timeout: Duration,
        probe_timeout: Duration,
        snapshots: watch::Sender<HeartbeatStatus>,
    ) -> Self {
        snapshots.send_replace(HeartbeatStatus::default());
        Self {
            enabled,
            interval,
            idle_timeout,
            probe_timeout,
            ticker: None,
            status: HeartbeatStatus::default(),
            snapshots,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.status.state
    }

    pub fn status(&self) -> &HeartbeatStatus {
        &self.status
    }

    pub fn is_armed(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<HeartbeatStatus> {
        self.snapshots.subscribe()
    }

    /// Start ticking. Returns `true` if the state changed.
    pub fn arm(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat armed");
        self.set_state(HeartbeatState::Active)
    }

    /// Stop ticking. Returns `true` if the state changed.
    pub fn disarm(&mut self) -> bool {
        if self.ticker.take().is_some() {
            debug!("Heartbeat disarmed");
        }
        self.set_state(HeartbeatState::Inactive)
    }

    /// Back to the initial state.
    pub fn reset(&mut self) {
        self.ticker = None;
        self.status = HeartbeatStatus::default();
        self.snapshots.send_replace(self.status.clone());
    }

    /// Wait for the next tick. Pending forever while disarmed.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Whether `idle` is long enough to warrant a probe.
    pub fn needs_probe(&self, idle: Duration) -> bool {
        idle > self.idle_timeout
    }

    /// Run one liveness probe, bounded by the probe timeout.
    pub async fn probe(
        &mut self,
        probe: &dyn LivenessProbe,
        session_id: &str,
        user_id: &str,
    ) -> HeartbeatVerdict {
        let verdict = match timeout(self.probe_timeout, probe.probe(session_id, user_id)).await {
            Ok(Ok(report)) if report.is_healthy() => HeartbeatVerdict::Alive,
            Ok(Ok(report)) => HeartbeatVerdict::Dead {
                reason: format!("backend reported status {}", report.status),
            },
            Ok(Err(err)) => HeartbeatVerdict::Dead {
                reason: err.to_string(),
            },
            Err(_) => HeartbeatVerdict::Dead {
                reason: format!("probe timed out after {:?}", self.probe_timeout),
            },
        };

        match &verdict {
            HeartbeatVerdict::Alive => {
                debug!(session_id, "Heartbeat probe succeeded");
                self.status.last_heartbeat = Some(Utc::now());
                self.status.state = HeartbeatState::Active;
            }
            HeartbeatVerdict::Dead { reason } => {
                warn!(session_id, reason = %reason, "Heartbeat probe failed");
                self.status.state = HeartbeatState::Error;
            }
        }
        self.snapshots.send_replace(self.status.clone());
        verdict
    }

    fn set_state(&mut self, state: HeartbeatState) -> bool {
        if self.status.state == state {
            return false;
        }
        self.status.state = state;
        self.snapshots.send_replace(self.status.clone());
        true
    }
}
