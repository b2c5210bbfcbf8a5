//! Access to the token-issuing service.

use crate::http::{HttpClient, HttpRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A credential as issued by the token service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeaseGrant {
    pub token: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub participant_identity: String,
}

#[async_trait]
pub trait TokenService: Send + Sync {
    async fn issue_lease(
        &self,
        channel_id: &str,
        duration_budget_sec: i64,
    ) -> Result<LeaseGrant, anyhow::Error>;
}

#[derive(Serialize)]
struct IssueLeaseRequest<'a> {
    channel_id: &'a str,
    duration_sec: i64,
}

/// Token service reached over HTTP.
///
/// POSTs `{"channel_id", "duration_sec"}` as JSON and expects
/// `{"token", "expires_at", "participant_identity"}` back, with
/// `expires_at` in unix seconds.
pub struct HttpTokenService {
    http_client: Arc<dyn HttpClient>,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpTokenService {
    pub fn new(http_client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn issue_lease(
        &self,
        channel_id: &str,
        duration_budget_sec: i64,
    ) -> Result<LeaseGrant, anyhow::Error> {
        let body = serde_json::to_vec(&IssueLeaseRequest {
            channel_id,
            duration_sec: duration_budget_sec,
        })?;

        let mut request = HttpRequest::post(&self.endpoint)
            .with_header("Content-Type", "application/json")
            .with_body(body);
        if let Some(token) = &self.bearer_token {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }

        debug!(target: "Call/Lease", "Requesting lease for channel {channel_id} from {}", self.endpoint);
        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(anyhow::anyhow!(
                "token service returned {}: {}",
                response.status_code,
                response.body_string()
            ));
        }

        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingMockHttpClient, MockHttpClient};

    #[tokio::test]
    async fn test_parses_grant() {
        let http = Arc::new(MockHttpClient::with_response(
            200,
            r#"{"token":"tok-1","expires_at":1893456000,"participant_identity":"alice"}"#,
        ));
        let service = HttpTokenService::new(http.clone(), "https://tokens.test/lease")
            .with_bearer_token("secret");

        let grant = service.issue_lease("room-1", 900).await.unwrap();
        assert_eq!(grant.token, "tok-1");
        assert_eq!(grant.participant_identity, "alice");
        assert_eq!(grant.expires_at.timestamp(), 1_893_456_000);

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "https://tokens.test/lease");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer secret")
        );
        let body: serde_json::Value =
            serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["channel_id"], "room-1");
        assert_eq!(body["duration_sec"], 900);
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let http = Arc::new(MockHttpClient::with_response(403, "forbidden"));
        let service = HttpTokenService::new(http, "https://tokens.test/lease");

        let err = service.issue_lease("room-1", 900).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let http = Arc::new(MockHttpClient::with_response(200, r#"{"token":"x"}"#));
        let service = HttpTokenService::new(http, "https://tokens.test/lease");

        assert!(service.issue_lease("room-1", 900).await.is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let service =
            HttpTokenService::new(Arc::new(FailingMockHttpClient), "https://tokens.test/lease");
        assert!(service.issue_lease("room-1", 900).await.is_err());
    }
}
