//! Session events and read-only observables for the UI layer.

use super::health::NetworkQuality;
use super::registry::RemoteParticipant;
use super::state::{SessionState, TeardownReason};
use super::transport::{MediaKind, RemoteTrack};
use log::trace;
use tokio::sync::{broadcast, watch};

/// A user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The camera could not be opened; the call continues audio-only.
    CameraUnavailable { reason: String },
    /// The call ended for a reason the user should be told about.
    CallEnded { reason: TeardownReason },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A remote track is ready to be attached to a sink.
    TrackSubscribed(RemoteTrack),
    /// A remote track must be detached from its sink.
    TrackUnsubscribed {
        participant_id: String,
        kind: MediaKind,
    },
    ParticipantLeft {
        participant_id: String,
    },
    QualityChanged(NetworkQuality),
    Notice(Notice),
    Ended {
        reason: TeardownReason,
        elapsed_secs: u64,
    },
}

/// Broadcast bus plus the watch channels backing the observables.
#[derive(Debug)]
pub struct SessionObservables {
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    elapsed_secs: watch::Sender<u64>,
    network_quality: watch::Sender<NetworkQuality>,
    remote_participants: watch::Sender<Vec<RemoteParticipant>>,
}

impl SessionObservables {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: broadcast::channel(capacity).0,
            state: watch::channel(SessionState::Idle).0,
            elapsed_secs: watch::channel(0).0,
            network_quality: watch::channel(NetworkQuality::Unknown).0,
            remote_participants: watch::channel(Vec::new()).0,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!(target: "Call/Events", "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_state(&self, state: SessionState) {
        if self.state.send_replace(state) != state {
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Sender handed to the call timer.
    pub fn elapsed_sender(&self) -> watch::Sender<u64> {
        self.elapsed_secs.clone()
    }

    pub fn set_elapsed_secs(&self, secs: u64) {
        self.elapsed_secs.send_replace(secs);
    }

    pub fn elapsed_secs(&self) -> u64 {
        *self.elapsed_secs.borrow()
    }

    pub fn watch_elapsed_secs(&self) -> watch::Receiver<u64> {
        self.elapsed_secs.subscribe()
    }

    /// Last write wins. Returns whether the value changed.
    pub fn set_network_quality(&self, quality: NetworkQuality) -> bool {
        let changed = self.network_quality.send_if_modified(|current| {
            if *current == quality {
                false
            } else {
                *current = quality;
                true
            }
        });
        if changed {
            self.emit(SessionEvent::QualityChanged(quality));
        }
        changed
    }

    pub fn network_quality(&self) -> NetworkQuality {
        *self.network_quality.borrow()
    }

    pub fn watch_network_quality(&self) -> watch::Receiver<NetworkQuality> {
        self.network_quality.subscribe()
    }

    pub fn set_remote_participants(&self, participants: Vec<RemoteParticipant>) {
        self.remote_participants.send_replace(participants);
    }

    pub fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.remote_participants.borrow().clone()
    }

    pub fn watch_remote_participants(&self) -> watch::Receiver<Vec<RemoteParticipant>> {
        self.remote_participants.subscribe()
    }
}
