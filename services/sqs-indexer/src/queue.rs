//! SQS message source.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use tracing::debug;

/// How long a received message stays invisible to other consumers.
const VISIBILITY_TIMEOUT_SECS: i32 = 60;
/// Long-poll wait before an empty receive reports the queue drained.
const WAIT_TIME_SECS: i32 = 10;

/// A received message awaiting deletion.
#[derive(Debug)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Trait for queue backends the drain loop can run against.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive at most one message; None means the queue reported empty.
    async fn receive_one(&self) -> Result<Option<QueueMessage>>;

    /// Delete a processed message.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// SQS queue client bound to a single queue.
pub struct MessageQueue {
    client: Client,
    queue_url: String,
}

impl MessageQueue {
    /// Connect using the ambient AWS configuration.
    ///
    /// `queue` may be a queue name or a full queue URL.
    pub async fn connect(queue: &str) -> Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let queue_url = if queue.starts_with("http://") || queue.starts_with("https://") {
            queue.to_string()
        } else {
            client
                .get_queue_url()
                .queue_name(queue)
                .send()
                .await
                .map_err(|e| anyhow!("Failed to resolve queue '{}': {}", queue, e))?
                .queue_url
                .ok_or_else(|| anyhow!("Queue '{}' has no URL", queue))?
        };

        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl MessageSource for MessageQueue {
    async fn receive_one(&self) -> Result<Option<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
            .wait_time_seconds(WAIT_TIME_SECS)
            .send()
            .await
            .map_err(|e| anyhow!("Receive failed: {}", e))?;

        let message = response.messages.unwrap_or_default().into_iter().next();

        Ok(message.and_then(|m| match (m.body, m.receipt_handle) {
            (Some(body), Some(receipt_handle)) => Some(QueueMessage {
                body,
                receipt_handle,
            }),
            _ => None,
        }))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        debug!(queue = %self.queue_url, "Deleting message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| anyhow!("Delete failed: {}", e))?;

        Ok(())
    }
}
