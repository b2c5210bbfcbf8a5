//! Per-participant bookkeeping of remote media subscriptions.

use super::transport::MediaKind;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotState {
    #[default]
    Idle,
    /// A subscribe is debouncing or in flight, tagged with the generation
    /// of the announcement that started it.
    Pending(u64),
    Subscribed,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackSlots {
    audio: SlotState,
    video: SlotState,
}

impl TrackSlots {
    fn slot_mut(&mut self, kind: MediaKind) -> &mut SlotState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn slot(&self, kind: MediaKind) -> SlotState {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

/// A remote peer as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipant {
    pub participant_id: String,
    pub subscribed_audio: bool,
    pub subscribed_video: bool,
}

impl RemoteParticipant {
    pub fn is_subscribed(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.subscribed_audio,
            MediaKind::Video => self.subscribed_video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeDecision {
    AlreadySubscribed,
    /// Subscribe, then commit or abort with this generation.
    ShouldSubscribe(u64),
}

/// Tracks which remote media kinds are subscribed.
///
/// Subscription is two-phase: [`try_subscribe`](Self::try_subscribe) records
/// the intent, and the flag only becomes true on
/// [`commit_subscribed`](Self::commit_subscribed) after the transport confirmed
/// it. While an intent is in flight further attempts for the same pair are
/// refused. Each intent carries a generation, so an intent withdrawn by an
/// unpublish and recreated by a republish is never completed by the older
/// attempt.
#[derive(Debug, Default)]
pub struct RemoteTrackRegistry {
    participants: HashMap<String, TrackSlots>,
    next_generation: u64,
}

impl RemoteTrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_participant_present(&mut self, participant_id: &str) {
        if !self.participants.contains_key(participant_id) {
            debug!(target: "Call/Registry", "Participant {participant_id} present");
            self.participants
                .insert(participant_id.to_string(), TrackSlots::default());
        }
    }

    pub fn try_subscribe(&mut self, participant_id: &str, kind: MediaKind) -> SubscribeDecision {
        let slots = self
            .participants
            .entry(participant_id.to_string())
            .or_default();
        let slot = slots.slot_mut(kind);
        match *slot {
            SlotState::Pending(_) | SlotState::Subscribed => SubscribeDecision::AlreadySubscribed,
            SlotState::Idle => {
                self.next_generation += 1;
                *slot = SlotState::Pending(self.next_generation);
                SubscribeDecision::ShouldSubscribe(self.next_generation)
            }
        }
    }

    /// Marks a pending subscription as done. Returns false when the intent
    /// was withdrawn or replaced in the meantime (unpublished, left or
    /// cleared), in which case nothing changes.
    pub fn commit_subscribed(
        &mut self,
        participant_id: &str,
        kind: MediaKind,
        generation: u64,
    ) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(slots) if slots.slot(kind) == SlotState::Pending(generation) => {
                *slots.slot_mut(kind) = SlotState::Subscribed;
                true
            }
            _ => false,
        }
    }

    /// Withdraws a pending intent after a failed subscribe.
    pub fn abort_subscribe(&mut self, participant_id: &str, kind: MediaKind, generation: u64) {
        if let Some(slots) = self.participants.get_mut(participant_id) {
            let slot = slots.slot_mut(kind);
            if *slot == SlotState::Pending(generation) {
                *slot = SlotState::Idle;
            }
        }
    }

    pub fn is_pending(&self, participant_id: &str, kind: MediaKind, generation: u64) -> bool {
        self.participants
            .get(participant_id)
            .is_some_and(|slots| slots.slot(kind) == SlotState::Pending(generation))
    }

    pub fn is_subscribed(&self, participant_id: &str, kind: MediaKind) -> bool {
        self.participants
            .get(participant_id)
            .is_some_and(|slots| slots.slot(kind) == SlotState::Subscribed)
    }

    /// Clears the flag for `kind`. The participant record stays. Returns
    /// whether the kind was subscribed.
    pub fn note_unpublished(&mut self, participant_id: &str, kind: MediaKind) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(slots) => {
                let was_subscribed = slots.slot(kind) == SlotState::Subscribed;
                *slots.slot_mut(kind) = SlotState::Idle;
                was_subscribed
            }
            None => false,
        }
    }

    pub fn remove(&mut self, participant_id: &str) -> Option<RemoteParticipant> {
        self.participants
            .remove(participant_id)
            .map(|slots| Self::snapshot(participant_id, &slots))
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, participant_id: &str) -> Option<RemoteParticipant> {
        self.participants
            .get(participant_id)
            .map(|slots| Self::snapshot(participant_id, slots))
    }

    /// All participants, ordered by id.
    pub fn participants(&self) -> Vec<RemoteParticipant> {
        let mut list: Vec<_> = self
            .participants
            .iter()
            .map(|(id, slots)| Self::snapshot(id, slots))
            .collect();
        list.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        list
    }

    fn snapshot(participant_id: &str, slots: &TrackSlots) -> RemoteParticipant {
        RemoteParticipant {
            participant_id: participant_id.to_string(),
            subscribed_audio: slots.audio == SlotState::Subscribed,
            subscribed_video: slots.video == SlotState::Subscribed,
        }
    }
}
