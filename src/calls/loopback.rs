//! In-process stand-ins for the SFU, the capture devices and the token
//! backend. Used by the demo binary to drive a full session offline.

use super::transport::{
    ConnectionState, LinkStats, LocalTrack, LocalTracks, MediaDevices, MediaKind,
    RealtimeTransport, RemoteTrack, TransportEvent,
};
use crate::token::{LeaseGrant, TokenService};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const PEER_ID: &str = "loopback-peer";
const QUALITY_PERIOD: Duration = Duration::from_secs(5);

/// A transport that pretends one remote peer is in the channel and
/// publishes audio and video as soon as we join.
#[derive(Default)]
pub struct LoopbackTransport {
    connected: AtomicBool,
    feeder: Mutex<Option<JoinHandle<()>>>,
    renewals: AtomicU32,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renewals(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackTransport {
    async fn join(
        &self,
        _credential: &str,
        channel_id: &str,
        identity: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, anyhow::Error> {
        let mut feeder = self.feeder.lock().await;
        if feeder.is_some() {
            anyhow::bail!("already joined");
        }
        info!(target: "Call/Loopback", "{identity} joined {channel_id}");
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(32);
        *feeder = Some(tokio::spawn(async move {
            let opening = [
                TransportEvent::ConnectionStateChanged(ConnectionState::Connected),
                TransportEvent::ParticipantPublished {
                    participant_id: PEER_ID.to_string(),
                    kind: MediaKind::Audio,
                },
                TransportEvent::ParticipantPublished {
                    participant_id: PEER_ID.to_string(),
                    kind: MediaKind::Video,
                },
            ];
            for event in opening {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            // Cycles through good, poor and back so the UI sees changes.
            let levels = [(1u8, 2u8), (3, 2), (2, 1)];
            let mut interval = tokio::time::interval(QUALITY_PERIOD);
            for (uplink, downlink) in levels.into_iter().cycle() {
                interval.tick().await;
                if tx
                    .send(TransportEvent::NetworkQuality { uplink, downlink })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }));
        Ok(rx)
    }

    async fn publish(&self, tracks: &LocalTracks) -> Result<(), anyhow::Error> {
        info!(target: "Call/Loopback", "Publishing {:?}", tracks.kinds());
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: &str,
        kind: MediaKind,
    ) -> Result<RemoteTrack, anyhow::Error> {
        if !self.is_connected() {
            anyhow::bail!("not connected");
        }
        Ok(RemoteTrack {
            participant_id: participant_id.to_string(),
            kind,
            track_id: format!("{participant_id}/{kind}"),
        })
    }

    async fn leave(&self) -> Result<(), anyhow::Error> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.lock().await.take() {
            feeder.abort();
        }
        info!(target: "Call/Loopback", "Left channel");
        Ok(())
    }

    async fn renew_credential(&self, _token: &str) -> Result<(), anyhow::Error> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn sample_stats(&self) -> Result<LinkStats, anyhow::Error> {
        Ok(LinkStats {
            rtt_ms: Some(42),
            packet_loss_pct: Some(0.5),
            send_bitrate_kbps: Some(1_200),
            recv_bitrate_kbps: Some(1_150),
        })
    }
}

#[derive(Debug)]
pub struct LoopbackTrack {
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LoopbackTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for LoopbackTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && !self.is_stopped()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(target: "Call/Loopback", "Stopped local {}", self.kind);
        }
    }
}

/// Fake capture devices. The microphone always works.
#[derive(Debug, Clone)]
pub struct LoopbackDevices {
    camera_available: bool,
}

impl LoopbackDevices {
    pub fn new(camera_available: bool) -> Self {
        Self { camera_available }
    }
}

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<Arc<dyn LocalTrack>, anyhow::Error> {
        if kind == MediaKind::Video && !self.camera_available {
            anyhow::bail!("no camera attached");
        }
        Ok(Arc::new(LoopbackTrack::new(kind)))
    }
}

/// Issues locally minted leases of a fixed lifetime.
#[derive(Debug, Clone)]
pub struct StaticTokenService {
    lifetime: chrono::Duration,
}

impl StaticTokenService {
    pub fn new(lifetime: chrono::Duration) -> Self {
        Self { lifetime }
    }
}

#[async_trait]
impl TokenService for StaticTokenService {
    async fn issue_lease(
        &self,
        channel_id: &str,
        _duration_budget_sec: i64,
    ) -> Result<LeaseGrant, anyhow::Error> {
        let now = Utc::now();
        Ok(LeaseGrant {
            token: format!("loopback-{channel_id}-{}", now.timestamp_millis()),
            expires_at: now + self.lifetime,
            participant_identity: "local".to_string(),
        })
    }
}
