//! In-memory event bus with consumer-group offsets.
//!
//! Every topic is a single partition (partition 0). Each consumer group keeps
//! its committed position per topic; a new subscription starts from it, which
//! gives the same redelivery behaviour as a real broker when a subscription is
//! dropped without committing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use snapshare_core::event::DomainEvent;
use snapshare_core::event_bus::{EventBus, EventBusError, Offsets, RawMessage, Subscription};
use snapshare_core::model::NotifyEvent;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<RawMessage>>,
    /// Next offset to read, per (group, topic)
    committed: HashMap<(String, String), i64>,
    subscriptions: usize,
    failing_publishes: usize,
    failing_commits: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    appended: Notify,
}

/// In-memory [`EventBus`] for tests.
///
/// # Example
///
/// ```
/// use snapshare_testing::InMemoryEventBus;
/// use snapshare_core::event_bus::EventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("image.liked", None, b"{}").await?;
/// assert_eq!(bus.messages("image.liked").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw payload to `topic`, returning its offset.
    pub fn push(&self, topic: &str, payload: impl Into<Vec<u8>>) -> i64 {
        self.append(topic, None, payload.into())
    }

    /// Append `event` to its topic, returning its offset.
    pub fn push_event(&self, event: &DomainEvent) -> i64 {
        self.push(event.kind().topic(), event.encode().unwrap())
    }

    /// All messages ever appended to `topic`.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<RawMessage> {
        let state = self.shared.state.lock().unwrap();
        state.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Decode every message on `topic` as a notification.
    #[must_use]
    pub fn notifications(&self, topic: &str) -> Vec<NotifyEvent> {
        self.messages(topic)
            .iter()
            .map(|message| serde_json::from_slice(&message.payload).unwrap())
            .collect()
    }

    /// Next offset `group` will read from `topic`, if it ever committed.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<i64> {
        let state = self.shared.state.lock().unwrap();
        state
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Number of subscriptions opened so far.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.state.lock().unwrap().subscriptions
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.state.lock().unwrap().failing_publishes += n;
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.shared.state.lock().unwrap().failing_commits += n;
    }

    fn append(&self, topic: &str, key: Option<Vec<u8>>, payload: Vec<u8>) -> i64 {
        let offset = {
            let mut state = self.shared.state.lock().unwrap();
            let log = state.topics.entry(topic.to_string()).or_default();
            let offset = i64::try_from(log.len()).unwrap();
            log.push(RawMessage {
                topic: topic.to_string(),
                partition: 0,
                offset,
                key,
                payload,
            });
            offset
        };
        self.shared.appended.notify_waiters();
        offset
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a [u8]>,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.failing_publishes > 0 {
                    state.failing_publishes -= 1;
                    return Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: "injected publish failure".to_string(),
                    });
                }
            }
            self.append(topic, key.map(<[u8]>::to_vec), payload.to_vec());
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        group: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventBusError>> + Send + 'a>>
    {
        Box::pin(async move {
            let position = {
                let mut state = self.shared.state.lock().unwrap();
                state.subscriptions += 1;
                state
                    .committed
                    .get(&(group.to_string(), topic.to_string()))
                    .copied()
                    .unwrap_or(0)
            };

            let subscription: Box<dyn Subscription> = Box::new(InMemorySubscription {
                shared: Arc::clone(&self.shared),
                topic: topic.to_string(),
                group: group.to_string(),
                position,
            });
            Ok(subscription)
        })
    }
}

/// Subscription handed out by [`InMemoryEventBus`].
#[derive(Debug)]
pub struct InMemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    position: i64,
}

impl InMemorySubscription {
    fn take(&mut self, max: usize) -> Vec<RawMessage> {
        let state = self.shared.state.lock().unwrap();
        let Some(log) = state.topics.get(&self.topic) else {
            return Vec::new();
        };

        let start = usize::try_from(self.position).unwrap();
        let chunk: Vec<RawMessage> = log.iter().skip(start).take(max.max(1)).cloned().collect();
        self.position += i64::try_from(chunk.len()).unwrap();
        chunk
    }
}

impl Subscription for InMemorySubscription {
    fn poll_chunk<'a>(
        &'a mut self,
        max: usize,
        wait: Duration,
        shutdown: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawMessage>, EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            let shared = Arc::clone(&self.shared);

            loop {
                // Register interest before checking, so an append in between is not missed.
                let appended = shared.appended.notified();
                tokio::pin!(appended);
                appended.as_mut().enable();

                let chunk = self.take(max);
                if !chunk.is_empty() || shutdown.is_cancelled() {
                    return Ok(chunk);
                }

                tokio::select! {
                    () = shutdown.cancelled() => return Ok(Vec::new()),
                    () = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                    () = &mut appended => {}
                }
            }
        })
    }

    fn commit<'a>(
        &'a mut self,
        offsets: &'a Offsets,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.shared.state.lock().unwrap();
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                return Err(EventBusError::CommitFailed("injected commit failure".to_string()));
            }

            for (topic, _partition, offset) in offsets.iter() {
                let next = state
                    .committed
                    .entry((self.group.clone(), topic.to_string()))
                    .or_insert(0);
                *next = (*next).max(offset + 1);
            }
            Ok(())
        })
    }
}
