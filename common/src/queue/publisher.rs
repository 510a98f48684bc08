// Task publisher implementation for NATS JetStream

use crate::errors::QueueError;
use crate::models::MetaTask;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{info, instrument};

/// TaskPublisher pushes MetaTasks onto the queue and clears pending ones
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TaskPublisher: Send + Sync {
    /// Publish a task to its topic
    async fn publish(&self, task: &MetaTask) -> Result<(), QueueError>;

    /// Drop every pending task on a topic, returning how many were removed
    async fn purge(&self, topic: &str) -> Result<u64, QueueError>;
}

/// NATS-based task publisher implementation
pub struct NatsTaskPublisher {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsTaskPublisher {
    /// Create a new NATS task publisher
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// Create a new NATS task publisher with custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    fn subject_for(&self, topic: &str) -> String {
        self.client.config().subject_for(topic)
    }
}

#[async_trait::async_trait]
impl TaskPublisher for NatsTaskPublisher {
    #[instrument(skip(self, task), fields(
        task_id = %task.task_id,
        job_name = %task.job_name,
        topic = %task.topic,
        sequence = task.sequence
    ))]
    async fn publish(&self, task: &MetaTask) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize task: {}", e))
        })?;

        let subject = self.subject_for(&task.topic);

        // Headers for broker-side deduplication and consumer routing
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", task.task_id.to_string().as_str());
        headers.insert("Pulse-Job", task.job_name.as_str());
        headers.insert("Pulse-Command", task.command_name.as_str());

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        // Wait for acknowledgment with timeout
        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(_ack)) => {
                info!(subject = %subject, "Task published successfully");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn purge(&self, topic: &str) -> Result<u64, QueueError> {
        let subject = self.subject_for(topic);
        self.client.purge_subject(&subject).await
    }
}
