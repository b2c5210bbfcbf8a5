//! Lease management: the credential used to join and stay in a session.

use crate::calls::{RealtimeTransport, SessionError};
use crate::token::{LeaseGrant, TokenService};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A time-bounded access credential. Replaced, never mutated, on renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub participant_identity: String,
}

impl Lease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

impl From<LeaseGrant> for Lease {
    fn from(grant: LeaseGrant) -> Self {
        Self {
            token: grant.token,
            expires_at: grant.expires_at,
            participant_identity: grant.participant_identity,
        }
    }
}

/// Result of one renewal check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    NoLease,
    NotDue,
    /// A new lease replaced the old one. `applied` tells whether the live
    /// connection accepted it; if not it is retried on the next check.
    Renewed { applied: bool },
    /// The old lease stays in effect until it expires.
    Failed,
}

/// Owns the current lease and renews it ahead of expiry.
///
/// Callers must not run `acquire` or `renew` concurrently for the same
/// session; the session controller serializes them.
pub struct LeaseManager {
    service: Arc<dyn TokenService>,
    renew_margin: Duration,
    current: RwLock<Option<Lease>>,
    /// A renewed token the live connection has not accepted yet.
    pending_apply: Mutex<Option<String>>,
}

impl LeaseManager {
    pub fn new(service: Arc<dyn TokenService>, renew_margin: Duration) -> Self {
        let floor = Duration::seconds(crate::config::MIN_RENEW_MARGIN_SECS as i64);
        Self {
            service,
            renew_margin: renew_margin.max(floor),
            current: RwLock::new(None),
            pending_apply: Mutex::new(None),
        }
    }

    pub fn renew_margin(&self) -> Duration {
        self.renew_margin
    }

    pub async fn current(&self) -> Option<Lease> {
        self.current.read().await.clone()
    }

    /// Fetches a fresh lease for joining.
    pub async fn acquire(
        &self,
        channel_id: &str,
        duration_budget_sec: i64,
    ) -> Result<Lease, SessionError> {
        let lease = self.fetch(channel_id, duration_budget_sec).await?;
        info!(target: "Call/Lease", "Acquired lease for {channel_id}, expires at {}", lease.expires_at);
        *self.current.write().await = Some(lease.clone());
        Ok(lease)
    }

    pub fn should_renew(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        lease.remaining(now) < self.renew_margin
    }

    /// Requests a replacement lease. On failure the current lease is kept.
    pub async fn renew(
        &self,
        channel_id: &str,
        duration_budget_sec: i64,
    ) -> Result<Lease, SessionError> {
        let lease = self.fetch(channel_id, duration_budget_sec).await?;
        info!(target: "Call/Lease", "Renewed lease for {channel_id}, expires at {}", lease.expires_at);
        *self.current.write().await = Some(lease.clone());
        // A newer token supersedes one still waiting to be applied.
        self.pending_apply.lock().await.take();
        Ok(lease)
    }

    /// Renews the lease if it is inside the renewal margin and pushes the
    /// new token to the live connection. Also retries a previously failed
    /// apply. Never fails: problems are logged and retried on the next call.
    pub async fn renew_if_due(
        &self,
        channel_id: &str,
        duration_budget_sec: i64,
        transport: &dyn RealtimeTransport,
        now: DateTime<Utc>,
    ) -> RenewOutcome {
        self.retry_pending_apply(transport).await;

        let Some(lease) = self.current().await else {
            return RenewOutcome::NoLease;
        };
        if !self.should_renew(&lease, now) {
            return RenewOutcome::NotDue;
        }

        debug!(
            target: "Call/Lease",
            "Lease expires in {}s, renewing",
            lease.remaining(now).num_seconds()
        );
        match self.renew(channel_id, duration_budget_sec).await {
            Ok(renewed) => {
                let applied = self.apply(transport, &renewed.token).await;
                RenewOutcome::Renewed { applied }
            }
            Err(e) => {
                if lease.is_expired_at(now) {
                    warn!(target: "Call/Lease", "Lease renewal failed and the lease has expired: {e}");
                } else {
                    warn!(target: "Call/Lease", "Lease renewal failed, will retry: {e}");
                }
                RenewOutcome::Failed
            }
        }
    }

    pub async fn has_pending_apply(&self) -> bool {
        self.pending_apply.lock().await.is_some()
    }

    pub async fn discard(&self) {
        self.current.write().await.take();
        self.pending_apply.lock().await.take();
    }

    async fn fetch(&self, channel_id: &str, duration_budget_sec: i64) -> Result<Lease, SessionError> {
        let grant = self
            .service
            .issue_lease(channel_id, duration_budget_sec)
            .await
            .map_err(|e| SessionError::TokenFetch(e.to_string()))?;
        let lease = Lease::from(grant);
        if lease.is_expired_at(Utc::now()) {
            return Err(SessionError::TokenFetch(format!(
                "issued lease already expired at {}",
                lease.expires_at
            )));
        }
        Ok(lease)
    }

    async fn apply(&self, transport: &dyn RealtimeTransport, token: &str) -> bool {
        if !transport.is_connected() {
            debug!(target: "Call/Lease", "Transport not connected, deferring credential update");
            *self.pending_apply.lock().await = Some(token.to_string());
            return false;
        }
        match transport.renew_credential(token).await {
            Ok(()) => {
                self.pending_apply.lock().await.take();
                true
            }
            Err(e) => {
                warn!(target: "Call/Lease", "Failed to apply renewed credential, will retry: {e}");
                *self.pending_apply.lock().await = Some(token.to_string());
                false
            }
        }
    }

    async fn retry_pending_apply(&self, transport: &dyn RealtimeTransport) {
        let pending = self.pending_apply.lock().await.clone();
        if let Some(token) = pending
            && self.apply(transport, &token).await
        {
            info!(target: "Call/Lease", "Applied previously deferred credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockTokenService, MockTransport};
    use std::sync::atomic::Ordering;

    fn lease_expiring_in(duration: Duration) -> Lease {
        Lease {
            token: "tok".to_string(),
            expires_at: Utc::now() + duration,
            participant_identity: "alice".to_string(),
        }
    }

    fn manager(tokens: Arc<MockTokenService>) -> LeaseManager {
        LeaseManager::new(tokens, Duration::minutes(5))
    }

    #[test]
    fn test_should_renew_boundary() {
        let manager = manager(Arc::new(MockTokenService::default()));
        let now = Utc::now();
        let lease = Lease {
            token: "tok".to_string(),
            expires_at: now + Duration::minutes(5),
            participant_identity: "alice".to_string(),
        };

        assert!(!manager.should_renew(&lease, now));
        assert!(manager.should_renew(&lease, now + Duration::seconds(1)));
        assert!(manager.should_renew(&lease, now + Duration::minutes(10)));
        assert!(!manager.should_renew(&lease, now - Duration::hours(1)));
    }

    #[test]
    fn test_margin_never_below_five_minutes() {
        let manager = LeaseManager::new(
            Arc::new(MockTokenService::default()),
            Duration::seconds(10),
        );
        assert_eq!(manager.renew_margin(), Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_acquire_stores_lease() {
        let tokens = Arc::new(MockTokenService::default());
        let manager = manager(tokens.clone());

        let lease = manager.acquire("room", 60).await.unwrap();
        assert_eq!(manager.current().await, Some(lease));
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_rejects_expired_grant() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::seconds(-1)));
        let manager = manager(tokens);

        let err = manager.acquire("room", 60).await.unwrap_err();
        assert!(matches!(err, SessionError::TokenFetch(_)));
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_renew_if_due_not_due() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::hours(1)));
        let manager = manager(tokens.clone());
        let transport = MockTransport::connected();
        manager.acquire("room", 60).await.unwrap();

        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::NotDue);
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
        assert!(transport.renewed_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_renew_if_due_replaces_and_applies() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::minutes(4)));
        let manager = manager(tokens.clone());
        let transport = MockTransport::connected();
        let first = manager.acquire("room", 60).await.unwrap();

        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::Renewed { applied: true });

        let second = manager.current().await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(transport.renewed_tokens(), vec![second.token]);
    }

    #[tokio::test]
    async fn test_renew_failure_keeps_old_lease() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::minutes(4)));
        let manager = manager(tokens.clone());
        let transport = MockTransport::connected();
        let first = manager.acquire("room", 60).await.unwrap();

        tokens.fail.store(true, Ordering::SeqCst);
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::Failed);
        assert_eq!(manager.current().await, Some(first));

        // Retried on the next check.
        tokens.fail.store(false, Ordering::SeqCst);
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::Renewed { applied: true });
    }

    #[tokio::test]
    async fn test_failed_apply_is_retried() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::minutes(4)));
        let manager = manager(tokens.clone());
        let transport = MockTransport::connected();
        manager.acquire("room", 60).await.unwrap();

        transport.fail_renew_credential.store(true, Ordering::SeqCst);
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::Renewed { applied: false });
        assert!(manager.has_pending_apply().await);

        tokens.set_valid_for(Duration::hours(1));
        transport.fail_renew_credential.store(false, Ordering::SeqCst);
        let pending_token = manager.current().await.unwrap().token;
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        // The pending token was issued with a 4 minute life, so it is renewed again.
        assert!(matches!(outcome, RenewOutcome::Renewed { applied: true }));
        assert!(!manager.has_pending_apply().await);
        assert_eq!(transport.renewed_tokens().first(), Some(&pending_token));
    }

    #[tokio::test]
    async fn test_apply_deferred_while_disconnected() {
        let tokens = Arc::new(MockTokenService::valid_for(Duration::minutes(4)));
        let manager = manager(tokens);
        let transport = MockTransport::connected();
        manager.acquire("room", 60).await.unwrap();

        transport.connected.store(false, Ordering::SeqCst);
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::Renewed { applied: false });
        assert!(manager.has_pending_apply().await);
        assert!(transport.renewed_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_discard() {
        let manager = manager(Arc::new(MockTokenService::default()));
        manager.acquire("room", 60).await.unwrap();
        manager.discard().await;
        assert!(manager.current().await.is_none());

        let transport = MockTransport::connected();
        let outcome = manager
            .renew_if_due("room", 60, transport.as_ref(), Utc::now())
            .await;
        assert_eq!(outcome, RenewOutcome::NoLease);
    }

    #[test]
    fn test_lease_expiry() {
        let lease = lease_expiring_in(Duration::minutes(1));
        assert!(!lease.is_expired_at(Utc::now()));
        assert!(lease.is_expired_at(Utc::now() + Duration::minutes(2)));
    }
}
