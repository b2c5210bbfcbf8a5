//! Session state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Acquiring a lease, joining the transport and capturing local media.
    Joining,
    /// Joined with local media published.
    Active,
    /// Teardown in progress.
    Ending,
    /// Terminal.
    Ended,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }

    pub fn is_tearing_down(&self) -> bool {
        matches!(self, Self::Ending | Self::Ended)
    }
}

/// Why a session ended. Recorded once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeardownReason {
    UserHangup,
    RemoteEnded,
    DurationExceeded,
    ConnectionLost,
    InitError,
}

impl TeardownReason {
    /// Silent reasons end the call without a user-facing notice: the local
    /// user asked for it, or the signaling layer already told them.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::UserHangup | Self::RemoteEnded)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::UserHangup => "call ended",
            Self::RemoteEnded => "call ended by peer",
            Self::DurationExceeded => "call time limit reached",
            Self::ConnectionLost => "connection lost",
            Self::InitError => "call could not be started",
        }
    }
}

/// State transitions for a session.
#[derive(Debug, Clone)]
pub enum SessionTransition {
    JoinRequested {
        channel_id: String,
        duration_budget_sec: i64,
    },
    Joined {
        started_at: Instant,
        local_identity: String,
    },
    JoinFailed,
    TeardownStarted {
        reason: TeardownReason,
    },
    TeardownFinished,
}

/// One call attempt.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionInfo {
    /// Empty until a join is requested.
    pub channel_id: String,
    pub duration_budget_sec: i64,
    pub state: SessionState,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    /// Wall-clock counterpart of `started_at`, for display and logs.
    pub joined_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub local_identity: Option<String>,
    pub end_reason: Option<TeardownReason>,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: SessionTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (self.state, transition) {
            (
                SessionState::Idle,
                SessionTransition::JoinRequested {
                    channel_id,
                    duration_budget_sec,
                },
            ) => {
                self.channel_id = channel_id;
                self.duration_budget_sec = duration_budget_sec;
                SessionState::Joining
            }
            (
                SessionState::Joining,
                SessionTransition::Joined {
                    started_at,
                    local_identity,
                },
            ) => {
                self.started_at = Some(started_at);
                self.joined_at = Some(Utc::now());
                self.local_identity = Some(local_identity);
                SessionState::Active
            }
            (SessionState::Joining, SessionTransition::JoinFailed) => {
                self.end_reason = Some(TeardownReason::InitError);
                self.ended_at = Some(Utc::now());
                SessionState::Ended
            }
            (
                SessionState::Joining | SessionState::Active,
                SessionTransition::TeardownStarted { reason },
            ) => {
                self.end_reason = Some(reason);
                SessionState::Ending
            }
            (SessionState::Ending, SessionTransition::TeardownFinished) => {
                self.ended_at = Some(Utc::now());
                SessionState::Ended
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
