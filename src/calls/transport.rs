//! Seams to the real-time SFU client and the local capture devices.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// An event raised by the transport while joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote participant published a track. Also raised for
    /// participants already present when we join.
    ParticipantPublished {
        participant_id: String,
        kind: MediaKind,
    },
    ParticipantUnpublished {
        participant_id: String,
        kind: MediaKind,
    },
    ParticipantLeft {
        participant_id: String,
    },
    ConnectionStateChanged(ConnectionState),
    /// Raw quality levels, 0 = unknown, 1 = excellent, 6 = down.
    NetworkQuality {
        uplink: u8,
        downlink: u8,
    },
}

/// Link statistics sampled by the health monitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStats {
    pub rtt_ms: Option<u32>,
    pub packet_loss_pct: Option<f32>,
    pub send_bitrate_kbps: Option<u32>,
    pub recv_bitrate_kbps: Option<u32>,
}

/// A subscribed remote track, handed to the UI for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub participant_id: String,
    pub kind: MediaKind,
    pub track_id: String,
}

/// A captured local track.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Releases the capture device. Idempotent.
    fn stop(&self);
}

/// The local tracks of a session. Audio is always present once joined;
/// video is absent in audio-only mode.
#[derive(Debug, Clone, Default)]
pub struct LocalTracks {
    pub audio: Option<Arc<dyn LocalTrack>>,
    pub video: Option<Arc<dyn LocalTrack>>,
}

impl LocalTracks {
    pub fn get(&self, kind: MediaKind) -> Option<&Arc<dyn LocalTrack>> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        MediaKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    pub fn is_audio_only(&self) -> bool {
        self.audio.is_some() && self.video.is_none()
    }

    pub fn stop_all(&self) {
        for track in [&self.audio, &self.video].into_iter().flatten() {
            track.stop();
        }
    }
}

/// Access to the local camera and microphone.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<Arc<dyn LocalTrack>, anyhow::Error>;
}

/// Client side of the selective forwarding unit.
///
/// Exclusively owned by one [`CallSession`](super::CallSession); nothing else
/// may join, leave, publish or subscribe on it.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Joins the channel and returns the stream of remote events. The stream
    /// closes when the transport leaves.
    async fn join(
        &self,
        credential: &str,
        channel_id: &str,
        identity: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, anyhow::Error>;

    async fn publish(&self, tracks: &LocalTracks) -> Result<(), anyhow::Error>;

    async fn subscribe(
        &self,
        participant_id: &str,
        kind: MediaKind,
    ) -> Result<RemoteTrack, anyhow::Error>;

    async fn leave(&self) -> Result<(), anyhow::Error>;

    /// Applies a renewed credential to the live connection.
    async fn renew_credential(&self, token: &str) -> Result<(), anyhow::Error>;

    fn is_connected(&self) -> bool;

    async fn sample_stats(&self) -> Result<LinkStats, anyhow::Error>;
}
