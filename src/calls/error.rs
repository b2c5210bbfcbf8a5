//! Call-session error types.

use super::state::SessionState;
use super::transport::MediaKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("token fetch failed: {0}")]
    TokenFetch(String),

    #[error("could not acquire local {kind}: {reason}")]
    MediaAcquisition { kind: MediaKind, reason: String },

    #[error("subscribe to {kind} of {participant_id} failed: {reason}")]
    Subscribe {
        participant_id: String,
        kind: MediaKind,
        reason: String,
    },

    #[error("transport join failed: {0}")]
    TransportJoin(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("join already in progress")]
    JoinInProgress,

    #[error("session is {0:?}")]
    InvalidState(SessionState),

    #[error("invalid session state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("join cancelled by teardown")]
    Cancelled,

    #[error("no local {0} track")]
    NoLocalTrack(MediaKind),
}
