//! Seam to the signaling channel that announces and ends calls.

use async_trait::async_trait;
use log::info;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn notify_session_started(
        &self,
        channel_id: &str,
        local_participant_id: &str,
    ) -> Result<(), anyhow::Error>;

    async fn notify_session_ended(
        &self,
        channel_id: &str,
        elapsed_sec: u64,
    ) -> Result<(), anyhow::Error>;
}

/// Signaling channel that only logs. For setups where another component
/// owns call announcements.
#[derive(Debug, Clone, Default)]
pub struct LoggingSignaling;

#[async_trait]
impl SignalingChannel for LoggingSignaling {
    async fn notify_session_started(
        &self,
        channel_id: &str,
        local_participant_id: &str,
    ) -> Result<(), anyhow::Error> {
        info!(target: "Call/Signaling", "Session started on {channel_id} as {local_participant_id}");
        Ok(())
    }

    async fn notify_session_ended(
        &self,
        channel_id: &str,
        elapsed_sec: u64,
    ) -> Result<(), anyhow::Error> {
        info!(target: "Call/Signaling", "Session on {channel_id} ended after {elapsed_sec}s");
        Ok(())
    }
}
