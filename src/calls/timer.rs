//! Call duration tracking and enforcement.

use log::{debug, info};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct TimerState {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    budget: Option<Duration>,
    ticker: Option<JoinHandle<()>>,
    deadline: Option<JoinHandle<()>>,
}

impl TimerState {
    fn elapsed(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.stopped_at.unwrap_or_else(Instant::now);
        let elapsed = end.saturating_duration_since(started_at);
        match self.budget {
            Some(budget) => elapsed.min(budget),
            None => elapsed,
        }
    }
}

/// Elapsed-time counter plus a one-shot deadline at the duration budget.
///
/// Elapsed time is always derived from the captured start instant, so a
/// stalled tick never makes the counter drift.
#[derive(Debug, Default)]
pub struct CallTimer {
    state: Mutex<TimerState>,
}

impl CallTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter, publishing whole elapsed seconds to `elapsed_tx`
    /// once per second, and arms `on_deadline` to fire `budget_sec` after
    /// now. A budget of zero or less disables the deadline.
    ///
    /// Restarting a running timer is a no-op.
    pub async fn start<F>(&self, budget_sec: i64, elapsed_tx: watch::Sender<u64>, on_deadline: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.started_at.is_some() {
            debug!(target: "Call/Timer", "Timer already started");
            return;
        }

        let started_at = Instant::now();
        let budget = (budget_sec > 0).then(|| Duration::from_secs(budget_sec as u64));
        state.started_at = Some(started_at);
        state.stopped_at = None;
        state.budget = budget;

        elapsed_tx.send_replace(0);
        state.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started_at + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let mut elapsed = started_at.elapsed();
                if let Some(budget) = budget {
                    elapsed = elapsed.min(budget);
                }
                elapsed_tx.send_replace(elapsed.as_secs());
            }
        }));

        if let Some(budget) = budget {
            let deadline = started_at + budget;
            info!(target: "Call/Timer", "Call limited to {}s", budget.as_secs());
            state.deadline = Some(tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                info!(target: "Call/Timer", "Duration budget of {}s reached", budget.as_secs());
                on_deadline();
            }));
        } else {
            info!(target: "Call/Timer", "No duration budget, deadline disabled");
        }
    }

    /// Cancels the counter and the deadline. The elapsed value freezes.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        if let Some(deadline) = state.deadline.take() {
            deadline.abort();
        }
        if state.started_at.is_some() && state.stopped_at.is_none() {
            state.stopped_at = Some(Instant::now());
            debug!(target: "Call/Timer", "Timer stopped at {}s", state.elapsed().as_secs());
        }
    }

    pub async fn elapsed(&self) -> Duration {
        self.state.lock().await.elapsed()
    }

    pub async fn elapsed_secs(&self) -> u64 {
        self.elapsed().await.as_secs()
    }

    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state.started_at.is_some() && state.stopped_at.is_none()
    }

    pub async fn deadline(&self) -> Option<Instant> {
        let state = self.state.lock().await;
        match (state.started_at, state.budget) {
            (Some(started_at), Some(budget)) => Some(started_at + budget),
            _ => None,
        }
    }
}
