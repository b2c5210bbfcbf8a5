//! Session controller: drives one call from join to teardown.

use super::error::SessionError;
use super::events::{Notice, SessionEvent, SessionObservables};
use super::health::{HealthMonitor, NetworkQuality};
use super::registry::{RemoteParticipant, RemoteTrackRegistry};
use super::signaling::SignalingChannel;
use super::state::{SessionInfo, SessionState, SessionTransition, TeardownReason};
use super::timer::CallTimer;
use super::transport::{LocalTracks, MediaDevices, MediaKind, RealtimeTransport, TransportEvent};
use crate::config::SessionConfig;
use crate::lease::LeaseManager;
use crate::token::TokenService;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Controls a single two-party call session over an SFU transport.
///
/// One instance handles one call attempt: once `Ended`, it stays ended.
/// Teardown runs exactly once whichever trigger arrives first (hangup,
/// remote end, duration budget, lost connection or failed join).
pub struct CallSession {
    config: SessionConfig,
    transport: Arc<dyn RealtimeTransport>,
    devices: Arc<dyn MediaDevices>,
    signaling: Arc<dyn SignalingChannel>,
    leases: Arc<LeaseManager>,
    pub(crate) registry: Mutex<RemoteTrackRegistry>,
    timer: CallTimer,
    health: Arc<HealthMonitor>,
    info: RwLock<SessionInfo>,
    local_tracks: Mutex<LocalTracks>,
    pub(crate) observables: SessionObservables,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    is_joining: AtomicBool,
    cleanup_started: AtomicBool,
    transport_joined: AtomicBool,
    /// Set before we leave the transport so the resulting disconnect is not
    /// mistaken for a lost connection. Never cleared: a session leaves at
    /// most once and cannot be rejoined.
    pub(crate) expected_disconnect: AtomicBool,
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn RealtimeTransport>,
        devices: Arc<dyn MediaDevices>,
        signaling: Arc<dyn SignalingChannel>,
        token_service: Arc<dyn TokenService>,
    ) -> Arc<Self> {
        let leases = Arc::new(LeaseManager::new(token_service, config.renew_margin()));
        let health = HealthMonitor::new(
            transport.clone(),
            leases.clone(),
            config.health_check_interval(),
        );
        let observables = SessionObservables::new(config.event_channel_capacity());

        Arc::new(Self {
            config,
            transport,
            devices,
            signaling,
            leases,
            registry: Mutex::new(RemoteTrackRegistry::new()),
            timer: CallTimer::new(),
            health,
            info: RwLock::new(SessionInfo::new()),
            local_tracks: Mutex::new(LocalTracks::default()),
            observables,
            event_pump: Mutex::new(None),
            is_joining: AtomicBool::new(false),
            cleanup_started: AtomicBool::new(false),
            transport_joined: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
        })
    }

    /// Joins `channel_id` with a maximum duration of `duration_budget_sec`
    /// (zero or less for unlimited).
    ///
    /// A join while another is in progress, or once teardown has begun, is
    /// dropped with an error and no side effects. Fatal failures end the
    /// session with [`TeardownReason::InitError`] and are returned.
    pub async fn join(
        self: &Arc<Self>,
        channel_id: &str,
        duration_budget_sec: i64,
    ) -> Result<(), SessionError> {
        if self.cleanup_started.load(Ordering::SeqCst) {
            warn!(target: "Call/Session", "Join dropped, session is {:?}", self.state());
            return Err(SessionError::InvalidState(self.state()));
        }
        if self.is_joining.swap(true, Ordering::SeqCst) {
            warn!(target: "Call/Session", "Join dropped, another join is in progress");
            return Err(SessionError::JoinInProgress);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_joining.store(false, Ordering::SeqCst);
        });

        {
            let mut info = self.info.write().await;
            info.apply_transition(SessionTransition::JoinRequested {
                channel_id: channel_id.to_string(),
                duration_budget_sec,
            })?;
            self.observables.set_state(info.state);
        }
        info!(target: "Call/Session", "Joining {channel_id} (budget {duration_budget_sec}s)");

        let lease = match self.leases.acquire(channel_id, duration_budget_sec).await {
            Ok(lease) => lease,
            Err(e) => return Err(self.fail_join(e).await),
        };
        if self.join_cancelled() {
            return Err(self.cancel_join().await);
        }

        let events = match self
            .transport
            .join(&lease.token, channel_id, &lease.participant_identity)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                return Err(self
                    .fail_join(SessionError::TransportJoin(e.to_string()))
                    .await);
            }
        };
        self.transport_joined.store(true, Ordering::SeqCst);
        if self.join_cancelled() {
            return Err(self.cancel_join().await);
        }

        let tracks = match self.acquire_local_media().await {
            Ok(tracks) => tracks,
            Err(e) => return Err(self.fail_join(e).await),
        };
        *self.local_tracks.lock().await = tracks.clone();
        if self.join_cancelled() {
            return Err(self.cancel_join().await);
        }

        if let Err(e) = self.transport.publish(&tracks).await {
            warn!(target: "Call/Session", "Failed to publish local media: {e}");
        }

        {
            let mut info = self.info.write().await;
            // Teardown takes this lock before stopping anything, so whatever
            // is started here is seen and stopped by it.
            if self.join_cancelled() {
                drop(info);
                return Err(self.cancel_join().await);
            }
            info.apply_transition(SessionTransition::Joined {
                started_at: Instant::now(),
                local_identity: lease.participant_identity.clone(),
            })?;
            self.observables.set_state(info.state);

            let weak = Arc::downgrade(self);
            self.timer
                .start(
                    duration_budget_sec,
                    self.observables.elapsed_sender(),
                    move || {
                        if let Some(session) = weak.upgrade() {
                            tokio::spawn(async move {
                                session.end(TeardownReason::DurationExceeded).await;
                            });
                        }
                    },
                )
                .await;
            self.health
                .start(channel_id.to_string(), duration_budget_sec)
                .await;

            let session = self.clone();
            *self.event_pump.lock().await =
                Some(tokio::spawn(session.run_event_pump(events)));
        }
        info!(
            target: "Call/Session",
            "Session active on {channel_id} as {}{}",
            lease.participant_identity,
            if tracks.is_audio_only() { " (audio only)" } else { "" }
        );

        if !self.join_cancelled()
            && let Err(e) = self
                .signaling
                .notify_session_started(channel_id, &lease.participant_identity)
                .await
        {
            warn!(target: "Call/Session", "Failed to announce session start: {e}");
        }
        Ok(())
    }

    /// Ends the call at the local user's request.
    pub async fn hangup(self: &Arc<Self>) -> bool {
        self.end(TeardownReason::UserHangup).await
    }

    /// Inbound signal that the peer ended the call on `channel_id`.
    pub async fn remote_call_ended(self: &Arc<Self>, channel_id: &str) -> bool {
        let current = self.info.read().await.channel_id.clone();
        if current != channel_id {
            debug!(target: "Call/Session", "Ignoring end of unrelated channel {channel_id}");
            return false;
        }
        self.end(TeardownReason::RemoteEnded).await
    }

    pub async fn toggle_mic(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_local_track_enabled(MediaKind::Audio, enabled).await
    }

    pub async fn toggle_camera(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_local_track_enabled(MediaKind::Video, enabled).await
    }

    /// Tears the session down. Only the first call does anything; it returns
    /// true. Sessions that never left `Idle` have nothing to tear down.
    pub async fn end(self: &Arc<Self>, reason: TeardownReason) -> bool {
        {
            let mut info = self.info.write().await;
            if matches!(info.state, SessionState::Idle | SessionState::Ended) {
                debug!(target: "Call/Session", "Nothing to tear down in {:?} ({reason:?})", info.state);
                return false;
            }
            if self.cleanup_started.swap(true, Ordering::SeqCst) {
                debug!(target: "Call/Session", "Teardown already started, ignoring {reason:?}");
                return false;
            }
            if let Err(e) = info.apply_transition(SessionTransition::TeardownStarted { reason }) {
                error!(target: "Call/Session", "Teardown transition rejected: {e}");
                return false;
            }
            self.observables.set_state(info.state);
        }
        info!(target: "Call/Session", "Ending session: {}", reason.description());

        self.timer.stop().await;
        self.health.stop().await;
        if let Some(pump) = self.event_pump.lock().await.take() {
            pump.abort();
        }
        self.leave_transport().await;
        self.release_local_tracks().await;
        self.clear_registry().await;
        self.leases.discard().await;

        let elapsed_secs = self.timer.elapsed_secs().await;
        self.observables.set_elapsed_secs(elapsed_secs);
        let (channel_id, started) = {
            let info = self.info.read().await;
            (info.channel_id.clone(), info.has_started())
        };
        if started
            && let Err(e) = self
                .signaling
                .notify_session_ended(&channel_id, elapsed_secs)
                .await
        {
            warn!(target: "Call/Session", "Failed to announce session end: {e}");
        }

        {
            let mut info = self.info.write().await;
            if let Err(e) = info.apply_transition(SessionTransition::TeardownFinished) {
                error!(target: "Call/Session", "Teardown finish rejected: {e}");
            }
            self.observables.set_state(SessionState::Ended);
        }
        self.finish(reason, elapsed_secs);
        true
    }

    pub fn state(&self) -> SessionState {
        self.observables.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.observables.watch_state()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.observables.elapsed_secs()
    }

    pub fn watch_elapsed_secs(&self) -> watch::Receiver<u64> {
        self.observables.watch_elapsed_secs()
    }

    pub fn network_quality(&self) -> NetworkQuality {
        self.observables.network_quality()
    }

    pub fn watch_network_quality(&self) -> watch::Receiver<NetworkQuality> {
        self.observables.watch_network_quality()
    }

    pub fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.observables.remote_participants()
    }

    pub fn watch_remote_participants(&self) -> watch::Receiver<Vec<RemoteParticipant>> {
        self.observables.watch_remote_participants()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.observables.subscribe()
    }

    pub async fn info(&self) -> SessionInfo {
        self.info.read().await.clone()
    }

    pub async fn end_reason(&self) -> Option<TeardownReason> {
        self.info.read().await.end_reason
    }

    pub async fn is_audio_only(&self) -> bool {
        self.local_tracks.lock().await.is_audio_only()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn RealtimeTransport> {
        &self.transport
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state().is_active() && !self.cleanup_started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_cleanup_started(&self) -> bool {
        self.cleanup_started.load(Ordering::SeqCst)
    }

    pub(crate) async fn publish_participants(&self) {
        let participants = self.registry.lock().await.participants();
        self.observables.set_remote_participants(participants);
    }

    fn join_cancelled(&self) -> bool {
        self.cleanup_started.load(Ordering::SeqCst)
    }

    async fn acquire_local_media(&self) -> Result<LocalTracks, SessionError> {
        let audio = self
            .devices
            .acquire(MediaKind::Audio)
            .await
            .map_err(|e| SessionError::MediaAcquisition {
                kind: MediaKind::Audio,
                reason: e.to_string(),
            })?;

        let video = match self.devices.acquire(MediaKind::Video).await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(target: "Call/Session", "Camera unavailable, continuing audio-only: {e}");
                self.observables
                    .emit(SessionEvent::Notice(Notice::CameraUnavailable {
                        reason: e.to_string(),
                    }));
                None
            }
        };

        Ok(LocalTracks {
            audio: Some(audio),
            video,
        })
    }

    /// Fatal join failure: straight from `Joining` to `Ended`. If a teardown
    /// already owns the session, only this join's own resources are undone.
    async fn fail_join(&self, err: SessionError) -> SessionError {
        error!(target: "Call/Session", "Join failed: {err}");
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            self.undo_join().await;
            return SessionError::Cancelled;
        }

        {
            let mut info = self.info.write().await;
            if let Err(e) = info.apply_transition(SessionTransition::JoinFailed) {
                error!(target: "Call/Session", "Join failure transition rejected: {e}");
            }
        }
        self.timer.stop().await;
        self.health.stop().await;
        self.undo_join().await;
        self.clear_registry().await;
        self.leases.discard().await;

        self.observables.set_state(SessionState::Ended);
        self.finish(TeardownReason::InitError, 0);
        err
    }

    /// A teardown started while this join was suspended.
    async fn cancel_join(&self) -> SessionError {
        info!(target: "Call/Session", "Join cancelled by teardown");
        self.undo_join().await;
        SessionError::Cancelled
    }

    async fn undo_join(&self) {
        self.leave_transport().await;
        self.release_local_tracks().await;
    }

    async fn leave_transport(&self) {
        if !self.transport_joined.swap(false, Ordering::SeqCst) {
            return;
        }
        self.expected_disconnect.store(true, Ordering::SeqCst);
        match self.transport.leave().await {
            Ok(()) => debug!(target: "Call/Session", "Left transport"),
            Err(e) => warn!(target: "Call/Session", "Failed to leave transport: {e}"),
        }
    }

    async fn release_local_tracks(&self) {
        let tracks = std::mem::take(&mut *self.local_tracks.lock().await);
        if !tracks.is_empty() {
            tracks.stop_all();
            debug!(target: "Call/Session", "Released local tracks {:?}", tracks.kinds());
        }
    }

    async fn clear_registry(&self) {
        self.registry.lock().await.clear();
        self.observables.set_remote_participants(Vec::new());
    }

    async fn set_local_track_enabled(
        &self,
        kind: MediaKind,
        enabled: bool,
    ) -> Result<(), SessionError> {
        let tracks = self.local_tracks.lock().await;
        let track = tracks.get(kind).ok_or(SessionError::NoLocalTrack(kind))?;
        track.set_enabled(enabled);
        info!(target: "Call/Session", "Local {kind} {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    fn finish(&self, reason: TeardownReason, elapsed_secs: u64) {
        if !reason.is_silent() {
            self.observables
                .emit(SessionEvent::Notice(Notice::CallEnded { reason }));
        }
        self.observables.emit(SessionEvent::Ended {
            reason,
            elapsed_secs,
        });
        info!(target: "Call/Session", "Session ended ({reason:?}) after {elapsed_secs}s");
    }

    async fn run_event_pump(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if self.is_cleanup_started() {
                break;
            }
            self.handle_transport_event(event).await;
        }
        debug!(target: "Call/Session", "Transport event stream closed");
    }
}
