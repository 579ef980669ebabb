//! Event bus abstraction over a log-based broker.
//!
//! The worker reads raw domain-event payloads from topics through a consumer
//! group, and publishes outbound notifications to another topic. This module
//! defines the two traits every broker implementation provides:
//!
//! - [`EventBus`]: publish raw payloads and open subscriptions
//! - [`Subscription`]: poll chunks of [`RawMessage`]s and commit [`Offsets`]
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: offsets are committed explicitly by the caller, only
//!   after the messages have been fully processed
//! - **Redelivery**: dropping a subscription without committing and opening a
//!   new one for the same group resumes from the last committed offset
//! - **Ordering**: preserved within a partition only
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `snapshare-testing` - for tests
//! - `RedpandaEventBus` in `snapshare-redpanda` - for production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! let mut subscription = event_bus.subscribe("image.liked", "group-2").await?;
//! let chunk = subscription.poll_chunk(100, Duration::from_secs(1), &shutdown).await?;
//!
//! let mut offsets = Offsets::default();
//! for message in &chunk {
//!     handle(&message.payload)?;
//!     offsets.record(message);
//! }
//! subscription.commit(&offsets).await?;
//! ```

use crate::error::{Classify, ErrorClass};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a payload to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}' (group '{group}'): {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The consumer group
        group: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit offsets
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl Classify for EventBusError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidTopic(_) => ErrorClass::Terminal,
            Self::ConnectionFailed(_)
            | Self::PublishFailed { .. }
            | Self::SubscriptionFailed { .. }
            | Self::CommitFailed(_)
            | Self::TransportError(_) => ErrorClass::Transient,
        }
    }
}

/// A message as delivered by the broker, before decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Optional message key
    pub key: Option<Vec<u8>>,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Highest processed offset per `(topic, partition)`.
///
/// Offsets recorded here are the offsets of processed messages; broker
/// implementations commit `offset + 1` (the next offset to read).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Offsets {
    positions: BTreeMap<(String, i32), i64>,
}

impl Offsets {
    /// Record `message` as processed.
    pub fn record(&mut self, message: &RawMessage) {
        self.positions
            .entry((message.topic.clone(), message.partition))
            .and_modify(|offset| *offset = (*offset).max(message.offset))
            .or_insert(message.offset);
    }

    /// Merge another set of offsets into this one, keeping the highest.
    pub fn merge(&mut self, other: &Self) {
        for ((topic, partition), offset) in &other.positions {
            self.positions
                .entry((topic.clone(), *partition))
                .and_modify(|current| *current = (*current).max(*offset))
                .or_insert(*offset);
        }
    }

    /// Highest processed offset for a partition.
    #[must_use]
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    /// Iterate over `(topic, partition, offset)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.positions
            .iter()
            .map(|((topic, partition), offset)| (topic.as_str(), *partition, *offset))
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

/// An open consumer-group subscription to one topic.
///
/// Messages are not committed implicitly. Dropping a subscription without
/// committing leaves the group at its last committed position.
pub trait Subscription: Send {
    /// Poll up to `max` messages.
    ///
    /// Waits at most `wait` for the first message, then drains whatever is
    /// immediately available up to `max`. Returns early with the messages
    /// collected so far (possibly none) when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] if the broker fails.
    fn poll_chunk<'a>(
        &'a mut self,
        max: usize,
        wait: Duration,
        shutdown: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>, EventBusError>> + Send + 'a>>;

    /// Commit processed offsets for the consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    fn commit<'a>(
        &'a mut self,
        offsets: &'a Offsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;
}

/// Trait for event bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so that the bus can be shared
/// as `Arc<dyn EventBus>` between runners.
pub trait EventBus: Send + Sync {
    /// Publish a raw payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a [u8]>,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Open a subscription to `topic` as a member of consumer group `group`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventBusError>> + Send + 'a>>;
}
