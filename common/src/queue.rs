//! Redis-compatible FIFO work queue.
//!
//! Single logical key, JSON-line encoded tasks, at-least-once delivery: a
//! crash between dequeue and measurement persistence re-runs the traceroute
//! on the next attempt, which is safe because persistence is idempotent.

use fred::interfaces::{KeysInterface, ListInterface};
use fred::prelude::Client;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

const QUEUE_KEY: &str = "cyberWatch:targets";

/// One unit of work: measure `target_ip`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetTask {
    pub target_ip: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub priority: u32,
}

impl TargetTask {
    #[must_use]
    pub fn new(target_ip: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target_ip: target_ip.into(),
            source: source.into(),
            domain: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// FIFO queue over a single Redis list.
#[derive(Clone)]
pub struct TargetQueue {
    client: Client,
}

impl TargetQueue {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Append `task`, JSON-encoded, to the tail of the queue.
    pub async fn enqueue(&self, task: &TargetTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)?;
        self.client.rpush::<(), _, _>(QUEUE_KEY, payload).await?;
        Ok(())
    }

    /// Blocking pop with a timeout, in seconds. Returns `None` on timeout.
    pub async fn dequeue(&self, timeout_seconds: f64) -> Result<Option<TargetTask>, QueueError> {
        let result: Option<(String, String)> =
            self.client.blpop(QUEUE_KEY, timeout_seconds).await?;
        match result {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Current queue length.
    pub async fn length(&self) -> Result<i64, QueueError> {
        Ok(self.client.llen(QUEUE_KEY).await?)
    }

    pub async fn close(&self) -> Result<(), QueueError> {
        use fred::interfaces::ClientLike;
        let _ = self.client.quit().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_roundtrips_through_json_with_identical_fields() {
        let task = TargetTask::new("1.1.1.1", "api").with_domain("example.com");
        let json = serde_json::to_string(&task).unwrap();
        let decoded: TargetTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task, decoded);
    }

    #[test]
    fn priority_defaults_to_zero_when_absent() {
        let json = r#"{"target_ip":"1.1.1.1","source":"static"}"#;
        let decoded: TargetTask = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.priority, 0);
        assert_eq!(decoded.domain, None);
    }
}
