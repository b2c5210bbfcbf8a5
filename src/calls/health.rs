//! Connection health: link quality classification and the periodic check
//! that samples the link and keeps the lease fresh.

use super::transport::{LinkStats, RealtimeTransport};
use crate::lease::{LeaseManager, RenewOutcome};
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Classified link quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum NetworkQuality {
    /// No sample yet.
    #[default]
    Unknown,
    Good,
    Poor,
    Bad,
}

impl NetworkQuality {
    /// Maps a raw transport level: 1-2 good, 3-4 poor, 5 and up bad.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Unknown,
            1..=2 => Self::Good,
            3..=4 => Self::Poor,
            _ => Self::Bad,
        }
    }

    /// Worst of the two directions.
    pub fn from_samples(uplink: u8, downlink: u8) -> Self {
        Self::from_level(uplink.max(downlink))
    }
}

/// What one health check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Transport not connected; nothing was done.
    Skipped,
    Checked { renewal: RenewOutcome },
}

/// Periodic liveness check of an active session.
pub struct HealthMonitor {
    transport: Arc<dyn RealtimeTransport>,
    leases: Arc<LeaseManager>,
    interval: Duration,
    last_stats: RwLock<Option<LinkStats>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        leases: Arc<LeaseManager>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            leases,
            interval,
            last_stats: RwLock::new(None),
            task: Mutex::new(None),
        })
    }

    /// Starts ticking every interval, first tick one interval from now.
    pub async fn start(self: &Arc<Self>, channel_id: String, duration_budget_sec: i64) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!(target: "Call/Health", "Health monitor already running");
            return;
        }

        info!(target: "Call/Health", "Health monitor started ({}s interval)", self.interval.as_secs());
        let monitor = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + monitor.interval, monitor.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                monitor.tick(&channel_id, duration_budget_sec).await;
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            debug!(target: "Call/Health", "Health monitor stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    pub async fn last_stats(&self) -> Option<LinkStats> {
        self.last_stats.read().await.clone()
    }

    /// One health check. Sampling failures are logged and ignored.
    pub async fn tick(&self, channel_id: &str, duration_budget_sec: i64) -> TickOutcome {
        if !self.transport.is_connected() {
            debug!(target: "Call/Health", "Transport not connected, skipping health check");
            return TickOutcome::Skipped;
        }

        match self.transport.sample_stats().await {
            Ok(stats) => {
                debug!(
                    target: "Call/Health",
                    "rtt={:?}ms loss={:?}% send={:?}kbps recv={:?}kbps",
                    stats.rtt_ms,
                    stats.packet_loss_pct,
                    stats.send_bitrate_kbps,
                    stats.recv_bitrate_kbps
                );
                *self.last_stats.write().await = Some(stats);
            }
            Err(e) => warn!(target: "Call/Health", "Failed to sample link stats: {e}"),
        }

        let renewal = self
            .leases
            .renew_if_due(
                channel_id,
                duration_budget_sec,
                self.transport.as_ref(),
                Utc::now(),
            )
            .await;
        TickOutcome::Checked { renewal }
    }
}
