//! Two-party call sessions over an SFU transport.
//!
//! # Architecture
//!
//! - [`CallSession`]: lifecycle controller, owns everything below
//! - [`SessionState`] & [`SessionInfo`]: session state machine
//! - [`RemoteTrackRegistry`]: per-participant subscribe bookkeeping
//! - [`HealthMonitor`]: periodic link sampling and lease renewal
//! - [`CallTimer`]: elapsed counter and duration-budget deadline
//! - [`RealtimeTransport`], [`MediaDevices`], [`SignalingChannel`]:
//!   collaborator seams
//!
//! A session is driven by its public operations (join, hangup, toggles)
//! and by [`TransportEvent`]s read from the joined transport. Consumers
//! observe it through watch channels and a [`SessionEvent`] broadcast.

mod error;
mod events;
mod handler;
mod health;
pub mod loopback;
mod manager;
mod registry;
mod signaling;
mod state;
mod timer;
mod transport;


pub use error::SessionError;
pub use events::{Notice, SessionEvent, SessionObservables};
pub use health::{HealthMonitor, NetworkQuality, TickOutcome};
pub use manager::CallSession;
pub use registry::{RemoteParticipant, RemoteTrackRegistry, SubscribeDecision};
pub use signaling::{LoggingSignaling, SignalingChannel};
pub use state::{InvalidTransition, SessionInfo, SessionState, SessionTransition, TeardownReason};
pub use timer::CallTimer;
pub use transport::{
    ConnectionState, LinkStats, LocalTrack, LocalTracks, MediaDevices, MediaKind,
    RealtimeTransport, RemoteTrack, TransportEvent,
};
