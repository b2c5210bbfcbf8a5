//! Transport event handling for an active session.

use super::error::SessionError;
use super::events::SessionEvent;
use super::health::NetworkQuality;
use super::manager::CallSession;
use super::registry::SubscribeDecision;
use super::state::TeardownReason;
use super::transport::{ConnectionState, MediaKind, TransportEvent};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl CallSession {
    pub(crate) async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        debug!(target: "Call/Session", "Transport event: {event:?}");

        match event {
            TransportEvent::ParticipantPublished {
                participant_id,
                kind,
            } => self.on_published(participant_id, kind).await,
            TransportEvent::ParticipantUnpublished {
                participant_id,
                kind,
            } => self.on_unpublished(&participant_id, kind).await,
            TransportEvent::ParticipantLeft { participant_id } => {
                self.on_participant_left(&participant_id).await
            }
            TransportEvent::ConnectionStateChanged(state) => self.on_connection_state(state),
            TransportEvent::NetworkQuality { uplink, downlink } => {
                self.observables
                    .set_network_quality(NetworkQuality::from_samples(uplink, downlink));
            }
        }
    }

    async fn on_published(self: &Arc<Self>, participant_id: String, kind: MediaKind) {
        if !self.is_active() {
            debug!(target: "Call/Session", "Ignoring {kind} from {participant_id}, session not active");
            return;
        }

        let decision = {
            let mut registry = self.registry.lock().await;
            registry.note_participant_present(&participant_id);
            registry.try_subscribe(&participant_id, kind)
        };
        self.publish_participants().await;

        match decision {
            SubscribeDecision::AlreadySubscribed => {
                debug!(target: "Call/Session", "{kind} of {participant_id} already subscribed or pending");
            }
            SubscribeDecision::ShouldSubscribe(generation) => {
                let session = self.clone();
                tokio::spawn(async move {
                    session
                        .subscribe_after_debounce(participant_id, kind, generation)
                        .await;
                });
            }
        }
    }

    /// Waits out the debounce window, then subscribes if the intent is
    /// still wanted. Burst announcements of the same track collapse into
    /// this single attempt. An attempt whose `generation` was superseded by
    /// an unpublish and republish drops out and leaves the newer one alone.
    async fn subscribe_after_debounce(
        self: Arc<Self>,
        participant_id: String,
        kind: MediaKind,
        generation: u64,
    ) {
        tokio::time::sleep(self.config().subscribe_debounce()).await;

        let still_wanted = self.is_active()
            && self.transport().is_connected()
            && self
                .registry
                .lock()
                .await
                .is_pending(&participant_id, kind, generation);
        if !still_wanted {
            debug!(target: "Call/Session", "Dropping subscribe to {kind} of {participant_id}");
            self.registry
                .lock()
                .await
                .abort_subscribe(&participant_id, kind, generation);
            return;
        }

        match self.transport().subscribe(&participant_id, kind).await {
            Ok(track) => {
                let committed = self.is_active()
                    && self
                        .registry
                        .lock()
                        .await
                        .commit_subscribed(&participant_id, kind, generation);
                if !committed {
                    debug!(target: "Call/Session", "Subscribed {kind} of {participant_id} is no longer wanted");
                    return;
                }
                info!(target: "Call/Session", "Subscribed to {kind} of {participant_id}");
                self.observables.emit(SessionEvent::TrackSubscribed(track));
                self.publish_participants().await;
            }
            Err(e) => {
                let err = SessionError::Subscribe {
                    participant_id: participant_id.clone(),
                    kind,
                    reason: e.to_string(),
                };
                warn!(target: "Call/Session", "{err}");
                self.registry
                    .lock()
                    .await
                    .abort_subscribe(&participant_id, kind, generation);
            }
        }
    }

    async fn on_unpublished(&self, participant_id: &str, kind: MediaKind) {
        let was_subscribed = self
            .registry
            .lock()
            .await
            .note_unpublished(participant_id, kind);
        if was_subscribed {
            self.observables.emit(SessionEvent::TrackUnsubscribed {
                participant_id: participant_id.to_string(),
                kind,
            });
        }
        self.publish_participants().await;
    }

    async fn on_participant_left(&self, participant_id: &str) {
        let removed = self.registry.lock().await.remove(participant_id);
        if let Some(participant) = removed {
            for kind in MediaKind::ALL {
                if participant.is_subscribed(kind) {
                    self.observables.emit(SessionEvent::TrackUnsubscribed {
                        participant_id: participant_id.to_string(),
                        kind,
                    });
                }
            }
        }
        info!(target: "Call/Session", "Participant {participant_id} left");
        self.observables.emit(SessionEvent::ParticipantLeft {
            participant_id: participant_id.to_string(),
        });
        self.publish_participants().await;
    }

    fn on_connection_state(self: &Arc<Self>, state: ConnectionState) {
        if !state.is_disconnected() {
            debug!(target: "Call/Session", "Connection {state:?}");
            return;
        }
        if self.expected_disconnect.load(Ordering::SeqCst) || self.is_cleanup_started() {
            debug!(target: "Call/Session", "Expected disconnect");
            return;
        }

        warn!(target: "Call/Session", "{}, tearing down", SessionError::ConnectionLost);
        let session = self.clone();
        tokio::spawn(async move {
            session.end(TeardownReason::ConnectionLost).await;
        });
    }
}
