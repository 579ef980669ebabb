//! Redpanda event bus for the snapshare worker.
//!
//! This crate implements the [`EventBus`] and [`Subscription`] traits from
//! `snapshare-core` with rdkafka, so it works against Redpanda or any other
//! Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Auto-commit is disabled; a [`RedpandaSubscription`] only commits the
//!   offsets its caller hands to [`Subscription::commit`]
//! - Dropping a subscription without committing leaves the consumer group at
//!   its last committed position, so the next subscription sees the
//!   uncommitted messages again
//! - Ordering is guaranteed within a partition only
//!
//! # Example
//!
//! ```no_run
//! use snapshare_core::event_bus::{EventBus, Offsets};
//! use snapshare_redpanda::RedpandaEventBus;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//! let shutdown = CancellationToken::new();
//!
//! let mut subscription = event_bus.subscribe("image.liked", "group-2").await?;
//! let chunk = subscription.poll_chunk(100, Duration::from_secs(1), &shutdown).await?;
//!
//! let mut offsets = Offsets::default();
//! for message in &chunk {
//!     offsets.record(message);
//! }
//! subscription.commit(&offsets).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use snapshare_core::event_bus::{EventBus, EventBusError, Offsets, RawMessage, Subscription};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Redpanda event bus.
///
/// Owns one producer shared by every publisher. Each call to
/// [`EventBus::subscribe`] creates a dedicated consumer for one topic and
/// consumer group.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, send timeout
/// - **Offset reset**: Where new groups start reading (default: "earliest")
/// - **Session timeout**: Consumer group session timeout (default: 6s)
///
/// # Example
///
/// ```no_run
/// use snapshare_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaEventBus {
    /// Create an event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        config
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4" or "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where consumer groups without a committed offset start reading:
    /// "earliest", "latest" or "error".
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());
        let session_timeout = self.session_timeout.unwrap_or(Duration::from_secs(6));

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            auto_offset_reset = %auto_offset_reset,
            session_timeout_ms = session_timeout.as_millis(),
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
            session_timeout,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a [u8]>,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic).payload(payload);
            let record = match key {
                Some(key) => record.key(key),
                None => record,
            };

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, partition, offset, "Message published");
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventBusError>> + Send + 'a>>
    {
        Box::pin(async move {
            let failed = |reason: String| EventBusError::SubscriptionFailed {
                topic: topic.to_string(),
                group: group.to_string(),
                reason,
            };

            let consumer: StreamConsumer = self
                .consumer_config(group)
                .create()
                .map_err(|e| failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[topic])
                .map_err(|e| failed(format!("Failed to subscribe to topic: {e}")))?;

            tracing::info!(
                topic,
                consumer_group = group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            Ok(Box::new(RedpandaSubscription {
                consumer,
                topic: topic.to_string(),
            }) as Box<dyn Subscription>)
        })
    }
}

/// A manual-commit consumer for one topic and consumer group.
pub struct RedpandaSubscription {
    consumer: StreamConsumer,
    topic: String,
}

impl RedpandaSubscription {
    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn to_raw(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        // An absent payload decodes as malformed and is skipped by the runner.
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

fn commit_list(offsets: &Offsets) -> Result<TopicPartitionList, EventBusError> {
    let mut list = TopicPartitionList::new();
    for (topic, partition, offset) in offsets.iter() {
        list.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;
    }
    Ok(list)
}

impl Subscription for RedpandaSubscription {
    fn poll_chunk<'a>(
        &'a mut self,
        max: usize,
        wait: Duration,
        shutdown: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>, EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let mut chunk = Vec::new();
            if max == 0 {
                return Ok(chunk);
            }

            let first = tokio::select! {
                () = shutdown.cancelled() => return Ok(chunk),
                received = tokio::time::timeout(wait, self.consumer.recv()) => received,
            };

            match first {
                Err(_elapsed) => return Ok(chunk),
                Ok(Err(e)) => {
                    return Err(EventBusError::TransportError(format!(
                        "Failed to receive message: {e}"
                    )));
                },
                Ok(Ok(message)) => chunk.push(to_raw(&message)),
            }

            while chunk.len() < max {
                match self.consumer.recv().now_or_never() {
                    Some(Ok(message)) => chunk.push(to_raw(&message)),
                    Some(Err(e)) => {
                        // The messages already received are redelivered if
                        // this chunk is dropped, so return what we have.
                        tracing::warn!(topic = %self.topic, error = %e, "Receive failed while draining");
                        break;
                    },
                    None => break,
                }
            }

            tracing::trace!(topic = %self.topic, messages = chunk.len(), "Polled chunk");
            Ok(chunk)
        })
    }

    fn commit<'a>(
        &'a mut self,
        offsets: &'a Offsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            if offsets.is_empty() {
                return Ok(());
            }

            let list = commit_list(offsets)?;
            self.consumer
                .commit(&list, CommitMode::Async)
                .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;

            tracing::debug!(topic = %self.topic, partitions = list.count(), "Offsets committed");
            Ok(())
        })
    }
}
