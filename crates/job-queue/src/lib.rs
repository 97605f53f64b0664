//! Durable job queue adapter
//!
//! Thin layer over AMQP: a durable queue, persistent JSON messages, and a
//! prefetch-1 consumer. Delivery is at-least-once; exactly-once execution
//! is the record store's job (the worker acks right after the atomic
//! acquire), so this adapter never acks on its own.

use anyhow::{Context, Result};
use common::config::AmqpConfig;
use common::models::video::TranscodeJob;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

// Consumers ack through these; re-exported so workers do not need their
// own AMQP dependency.
pub use lapin::acker::Acker;
pub use lapin::options::{BasicAckOptions, BasicNackOptions};

/// The one queue this service publishes to and consumes from.
pub const VIDEO_PROCESSING_QUEUE: &str = "video_processing";

/// Startup connection attempts before giving up.
const CONNECT_MAX_ATTEMPTS: u32 = 10;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Pause before re-entering the consume loop after a broken channel.
const CONSUME_RETRY_DELAY: Duration = Duration::from_secs(2);

struct Link {
    // Connection kept alive alongside its channel; dropping it closes both.
    _connection: Connection,
    channel: Channel,
}

/// Handle to the broker. Cheap to construct; connects lazily or via
/// [`JobQueue::connect`].
pub struct JobQueue {
    uri: String,
    link: Mutex<Option<Link>>,
}

impl JobQueue {
    pub fn new(config: &AmqpConfig) -> Self {
        Self {
            uri: config.uri(),
            link: Mutex::new(None),
        }
    }

    /// Establish the broker link with bounded exponential backoff.
    ///
    /// Exhausting the attempts is an irrecoverable startup failure; the
    /// caller exits non-zero.
    pub async fn connect(&self) -> Result<()> {
        let mut delay = CONNECT_INITIAL_DELAY;

        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match self.open_link().await {
                Ok(link) => {
                    info!(attempt, "connected to message broker");
                    *self.link.lock().await = Some(link);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = CONNECT_MAX_ATTEMPTS,
                        error = %e,
                        "broker connection failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_MAX_DELAY);
                }
            }
        }

        anyhow::bail!(
            "message broker unreachable after {} attempts",
            CONNECT_MAX_ATTEMPTS
        )
    }

    async fn open_link(&self) -> Result<Link> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .context("AMQP connection failed")?;
        let channel = connection
            .create_channel()
            .await
            .context("AMQP channel creation failed")?;

        channel
            .queue_declare(
                VIDEO_PROCESSING_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare processing queue")?;

        Ok(Link {
            _connection: connection,
            channel,
        })
    }

    async fn ensure_channel(&self) -> Result<Channel> {
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.as_ref() {
            if link.channel.status().connected() {
                return Ok(link.channel.clone());
            }
        }
        let link = self.open_link().await?;
        let channel = link.channel.clone();
        *guard = Some(link);
        Ok(channel)
    }

    async fn drop_link(&self) {
        *self.link.lock().await = None;
    }

    /// Publish a job as a persistent JSON message.
    ///
    /// A failed publish reconnects once and retries before surfacing the
    /// error.
    pub async fn publish(&self, queue: &str, job: &TranscodeJob) -> Result<()> {
        let payload = serde_json::to_vec(job).context("Failed to encode job payload")?;

        if let Err(e) = self.publish_raw(queue, &payload).await {
            warn!(error = %e, upload_id = %job.upload_id, "publish failed, reconnecting once");
            self.drop_link().await;
            self.publish_raw(queue, &payload)
                .await
                .context("Publish failed after reconnect")?;
        }

        info!(upload_id = %job.upload_id, queue, "job published");
        Ok(())
    }

    async fn publish_raw(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let channel = self.ensure_channel().await?;
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .context("basic_publish failed")?
            .await
            .context("broker rejected publish")?;
        Ok(())
    }

    /// Consume jobs forever with prefetch 1.
    ///
    /// The handler receives the decoded job and the acker; acknowledgement
    /// timing is entirely the handler's decision. Undecodable messages are
    /// acked and dropped. Channel loss re-enters the loop with a fresh
    /// connection.
    pub async fn consume<F, Fut>(&self, queue: &str, consumer_tag: &str, handler: F)
    where
        F: Fn(TranscodeJob, Acker) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let channel = match self.ensure_channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(error = %e, "consumer cannot reach broker, retrying");
                    sleep(CONSUME_RETRY_DELAY).await;
                    continue;
                }
            };

            if let Err(e) = channel.basic_qos(1, BasicQosOptions::default()).await {
                error!(error = %e, "failed to set prefetch");
                self.drop_link().await;
                sleep(CONSUME_RETRY_DELAY).await;
                continue;
            }

            let mut consumer = match channel
                .basic_consume(
                    queue,
                    consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    error!(error = %e, "failed to start consumer");
                    self.drop_link().await;
                    sleep(CONSUME_RETRY_DELAY).await;
                    continue;
                }
            };

            info!(queue, consumer_tag, "worker consuming");

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        match serde_json::from_slice::<TranscodeJob>(&delivery.data) {
                            Ok(job) => handler(job, delivery.acker).await,
                            Err(e) => {
                                error!(error = %e, "dropping undecodable job message");
                                if let Err(e) = delivery
                                    .acker
                                    .ack(lapin::options::BasicAckOptions::default())
                                    .await
                                {
                                    error!(error = %e, "failed to ack poison message");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "consumer stream error");
                        break;
                    }
                }
            }

            warn!(queue, "consumer stopped, reconnecting in {:?}", CONSUME_RETRY_DELAY);
            self.drop_link().await;
            sleep(CONSUME_RETRY_DELAY).await;
        }
    }
}
