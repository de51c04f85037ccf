//! Audit events for replay attempts.
//!
//! Recording is fire-and-forget: [`spawn_record`] hands the event to a
//! background task and a failing sink is only logged, never surfaced to the
//! caller of the replay.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Error;

/// Longest `targetHost` value written to an audit record, in characters.
pub const MAX_AUDIT_TARGET_LEN: usize = 50;

/// Terminal state of one replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Rejected,
    Succeeded,
    TimedOut,
    NetworkError,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
            Self::NetworkError => "network_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    pub target_host: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub user_id: String,
    pub action: &'static str,
    pub resource_id: String,
    pub metadata: AuditMetadata,
}

impl AuditEvent {
    /// A `"replay"` event. `target` is cut to [`MAX_AUDIT_TARGET_LEN`] characters.
    pub fn replay(
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        target: &str,
        outcome: Outcome,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            action: "replay",
            resource_id: resource_id.into(),
            metadata: AuditMetadata {
                target_host: target.chars().take(MAX_AUDIT_TARGET_LEN).collect(),
                outcome,
                response_status: None,
                error: None,
            },
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.metadata.response_status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.metadata.error = Some(error.into());
        self
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), Error>;
}

/// Writes each event as a structured log line on the `replay_guard::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), Error> {
        let json = serde_json::to_string(&event).map_err(|e| Error::Audit(e.to_string()))?;
        info!(
            target: "replay_guard::audit",
            user_id = %event.user_id,
            resource_id = %event.resource_id,
            outcome = event.metadata.outcome.as_str(),
            event = %json,
            "audit"
        );
        Ok(())
    }
}

/// Discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) -> Result<(), Error> {
        Ok(())
    }
}

/// Record `event` on a background task. Sink failures are logged and dropped.
pub fn spawn_record(sink: Arc<dyn AuditSink>, event: AuditEvent) {
    tokio::spawn(async move {
        let resource_id = event.resource_id.clone();
        if let Err(e) = sink.record(event).await {
            warn!(error = %e, %resource_id, "audit sink failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuditEvent) -> Result<(), Error> {
            Err(Error::Audit("sink down".into()))
        }
    }

    struct ChannelSink(mpsc::UnboundedSender<AuditEvent>);

    #[async_trait]
    impl AuditSink for ChannelSink {
        async fn record(&self, event: AuditEvent) -> Result<(), Error> {
            self.0.send(event).map_err(|e| Error::Audit(e.to_string()))
        }
    }

    #[test]
    fn test_target_is_truncated() {
        let long = format!("hooks.example.com/{}", "a".repeat(200));
        let event = AuditEvent::replay("u", "r", &long, Outcome::Rejected);
        assert_eq!(event.metadata.target_host.chars().count(), MAX_AUDIT_TARGET_LEN);
        assert!(event.metadata.target_host.starts_with("hooks.example.com/"));
    }

    #[test]
    fn test_serialized_shape() {
        let event = AuditEvent::replay("user-1", "req-1", "example.com/hook", Outcome::Succeeded)
            .with_status(201);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "userId": "user-1",
                "action": "replay",
                "resourceId": "req-1",
                "metadata": {
                    "targetHost": "example.com/hook",
                    "outcome": "succeeded",
                    "responseStatus": 201
                }
            })
        );
    }

    #[tokio::test]
    async fn test_spawn_record_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = AuditEvent::replay("u", "r", "example.com/", Outcome::TimedOut)
            .with_error("replay timed out");
        spawn_record(Arc::new(ChannelSink(tx)), event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_failing_sink_is_swallowed() {
        spawn_record(
            Arc::new(FailingSink),
            AuditEvent::replay("u", "r", "example.com/", Outcome::Rejected),
        );
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_tracing_sink_ok() {
        let event = AuditEvent::replay("u", "r", "example.com/", Outcome::NetworkError);
        assert!(TracingAuditSink.record(event).await.is_ok());
        assert!(NoopAuditSink
            .record(AuditEvent::replay("u", "r", "x", Outcome::Rejected))
            .await
            .is_ok());
    }
}
