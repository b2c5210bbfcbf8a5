use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::calls::{
    CallSession, ConnectionState, LinkStats, LocalTrack, LocalTracks, MediaDevices, MediaKind,
    RealtimeTransport, RemoteTrack, SignalingChannel, TransportEvent,
};
use crate::config::SessionConfig;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::token::{LeaseGrant, TokenService};

#[derive(Debug, Default)]
pub struct MockHttpClient {
    status_code: u16,
    body: String,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn with_response(status_code: u16, body: &str) -> Self {
        Self {
            status_code,
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status_code: self.status_code,
            body: self.body.clone().into_bytes(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("Not implemented"))
    }
}

/// Token service issuing unique tokens with a configurable lifetime.
#[derive(Debug)]
pub struct MockTokenService {
    valid_for: Mutex<chrono::Duration>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl Default for MockTokenService {
    fn default() -> Self {
        Self::valid_for(chrono::Duration::hours(1))
    }
}

impl MockTokenService {
    pub fn valid_for(duration: chrono::Duration) -> Self {
        Self {
            valid_for: Mutex::new(duration),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_valid_for(&self, duration: chrono::Duration) {
        *self.valid_for.lock().unwrap() = duration;
    }
}

#[async_trait]
impl TokenService for MockTokenService {
    async fn issue_lease(
        &self,
        channel_id: &str,
        _duration_budget_sec: i64,
    ) -> Result<LeaseGrant, anyhow::Error> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("token backend unavailable");
        }
        Ok(LeaseGrant {
            token: format!("{channel_id}-token-{n}"),
            expires_at: Utc::now() + *self.valid_for.lock().unwrap(),
            participant_identity: "local-user".to_string(),
        })
    }
}

/// Scriptable transport. Events are injected with [`MockTransport::send_event`].
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connected: AtomicBool,
    pub fail_join: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_renew_credential: AtomicBool,
    pub fail_stats: AtomicBool,
    pub join_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub leave_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    join_delay_ms: AtomicU64,
    subscribe_delay_ms: AtomicU64,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    renewed: Mutex<Vec<String>>,
    subscribed: Mutex<Vec<(String, MediaKind)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_join_delay(&self, delay: Duration) {
        self.join_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.subscribe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn renewed_tokens(&self) -> Vec<String> {
        self.renewed.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> Vec<(String, MediaKind)> {
        self.subscribed.lock().unwrap().clone()
    }

    /// Delivers an event to the joined session. False if not joined.
    pub async fn send_event(&self, event: TransportEvent) -> bool {
        let sender = self.events.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulates the SFU dropping us without a leave.
    pub async fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.send_event(TransportEvent::ConnectionStateChanged(
            ConnectionState::Disconnected,
        ))
        .await;
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn join(
        &self,
        _credential: &str,
        _channel_id: &str,
        _identity: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, anyhow::Error> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.join_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_join.load(Ordering::SeqCst) {
            anyhow::bail!("sfu rejected join");
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().unwrap() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn publish(&self, _tracks: &LocalTracks) -> Result<(), anyhow::Error> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            anyhow::bail!("publish rejected");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: &str,
        kind: MediaKind,
    ) -> Result<RemoteTrack, anyhow::Error> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            anyhow::bail!("subscribe rejected");
        }
        self.subscribed
            .lock()
            .unwrap()
            .push((participant_id.to_string(), kind));
        Ok(RemoteTrack {
            participant_id: participant_id.to_string(),
            kind,
            track_id: format!("{participant_id}-{kind}"),
        })
    }

    async fn leave(&self) -> Result<(), anyhow::Error> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(sender) = self.events.lock().unwrap().take() {
            let _ = sender.try_send(TransportEvent::ConnectionStateChanged(
                ConnectionState::Disconnected,
            ));
        }
        Ok(())
    }

    async fn renew_credential(&self, token: &str) -> Result<(), anyhow::Error> {
        if self.fail_renew_credential.load(Ordering::SeqCst) {
            anyhow::bail!("renew rejected");
        }
        self.renewed.lock().unwrap().push(token.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn sample_stats(&self) -> Result<LinkStats, anyhow::Error> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stats.load(Ordering::SeqCst) {
            anyhow::bail!("stats unavailable");
        }
        Ok(LinkStats {
            rtt_ms: Some(30),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
pub struct MockTrack {
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MockTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockDevices {
    pub fail_audio: AtomicBool,
    pub fail_video: AtomicBool,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn track(&self, kind: MediaKind) -> Option<Arc<MockTrack>> {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .find(|track| track.kind == kind)
            .cloned()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<Arc<dyn LocalTrack>, anyhow::Error> {
        let fail = match kind {
            MediaKind::Audio => &self.fail_audio,
            MediaKind::Video => &self.fail_video,
        };
        if fail.load(Ordering::SeqCst) {
            anyhow::bail!("{kind} device busy");
        }
        let track = Arc::new(MockTrack {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        self.tracks.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

#[derive(Debug, Default)]
pub struct RecordingSignaling {
    started: Mutex<Vec<(String, String)>>,
    ended: Mutex<Vec<(String, u64)>>,
}

impl RecordingSignaling {
    pub fn started(&self) -> Vec<(String, String)> {
        self.started.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<(String, u64)> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn notify_session_started(
        &self,
        channel_id: &str,
        local_participant_id: &str,
    ) -> Result<(), anyhow::Error> {
        self.started
            .lock()
            .unwrap()
            .push((channel_id.to_string(), local_participant_id.to_string()));
        Ok(())
    }

    async fn notify_session_ended(
        &self,
        channel_id: &str,
        elapsed_sec: u64,
    ) -> Result<(), anyhow::Error> {
        self.ended
            .lock()
            .unwrap()
            .push((channel_id.to_string(), elapsed_sec));
        Ok(())
    }
}

/// A session wired to fresh mocks.
pub struct TestSession {
    pub session: Arc<CallSession>,
    pub transport: Arc<MockTransport>,
    pub devices: Arc<MockDevices>,
    pub signaling: Arc<RecordingSignaling>,
    pub tokens: Arc<MockTokenService>,
}

pub fn create_test_session() -> TestSession {
    create_test_session_with_config(SessionConfig::default())
}

pub fn create_test_session_with_config(config: SessionConfig) -> TestSession {
    let transport = MockTransport::new();
    let devices = MockDevices::new();
    let signaling = Arc::new(RecordingSignaling::default());
    let tokens = Arc::new(MockTokenService::default());
    let session = CallSession::new(
        config,
        transport.clone(),
        devices.clone(),
        signaling.clone(),
        tokens.clone(),
    );
    TestSession {
        session,
        transport,
        devices,
        signaling,
        tokens,
    }
}
