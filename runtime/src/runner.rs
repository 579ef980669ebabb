//! Consumer-group runners.
//!
//! A [`ConsumerGroupRunner`] owns one subscription (topic + consumer group) and
//! drives it through one of two pipelines:
//!
//! - [`Pipeline::Count`]: events are batched, reduced and persisted through a
//!   [`CounterSink`]; offsets commit after each successful batch
//! - [`Pipeline::Notify`]: events are fanned out one at a time through a
//!   [`NotificationFanout`]; offsets commit after each chunk
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Polling ──► Decoding ──► Accumulating ──► Committing ──► Polling
//!                           └─────► Notifying ──────────┘
//! ```
//!
//! `Cancelled` is reachable from every state once the shutdown token fires.
//!
//! # Failure Handling
//!
//! Malformed messages are skipped with a warning and count as processed.
//! Terminal fan-out errors skip the event. Any other failure drops the
//! subscription without committing; after `resubscribe_delay` the runner
//! subscribes again and the broker redelivers from the last committed offset.
//! Work abandoned after the shutdown grace period stops the runner with the
//! same guarantee: nothing past the last committed offset is committed.

use crate::fanout::NotificationFanout;
use crate::sink::CounterSink;
use metrics::counter;
use snapshare_core::aggregate::reduce;
use snapshare_core::batch::{Batch, BatchAccumulator, BatchConfig, FlushTrigger};
use snapshare_core::error::{Classify, ErrorClass, Result};
use snapshare_core::event::{self, DomainEvent, EventKind};
use snapshare_core::event_bus::{EventBus, Offsets, RawMessage, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Subscription and polling settings of one runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Name used in logs and the final report
    pub name: String,
    /// Event kind carried by the topic
    pub kind: EventKind,
    /// Consumer group
    pub group: String,
    /// Maximum messages per poll
    pub max_poll_records: usize,
    /// Maximum time a poll waits for the first message
    pub fetch_timeout: Duration,
    /// Pause before resubscribing after a failed unit of work
    pub resubscribe_delay: Duration,
}

impl RunnerConfig {
    /// Settings for `kind` in `group`, with default polling parameters.
    #[must_use]
    pub fn new(kind: EventKind, group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            name: format!("{kind}/{group}"),
            kind,
            group,
            max_poll_records: 100,
            fetch_timeout: Duration::from_secs(1),
            resubscribe_delay: Duration::from_secs(5),
        }
    }

    /// Set the maximum messages per poll.
    #[must_use]
    pub const fn with_max_poll_records(mut self, max_poll_records: usize) -> Self {
        self.max_poll_records = max_poll_records;
        self
    }

    /// Set the poll wait.
    #[must_use]
    pub const fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Set the resubscribe pause.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, resubscribe_delay: Duration) -> Self {
        self.resubscribe_delay = resubscribe_delay;
        self
    }

    /// Topic the runner reads.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

/// What a runner does with decoded events.
#[derive(Clone)]
pub enum Pipeline {
    /// Per-event notification fan-out
    Notify(Arc<NotificationFanout>),
    /// Batched counter aggregation
    Count {
        /// Where net deltas are written
        sink: Arc<CounterSink>,
        /// Batch thresholds
        batch: BatchConfig,
    },
}

/// Runner lifecycle states, logged at trace level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    /// Not subscribed
    Idle,
    /// Waiting for messages
    Polling,
    /// Decoding a chunk
    Decoding,
    /// Feeding the batch accumulator
    Accumulating,
    /// Running the fan-out for one event
    Notifying,
    /// Committing offsets
    Committing,
    /// Stopped by the shutdown token
    Cancelled,
}

/// What a runner did before it stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunnerReport {
    /// Runner name
    pub name: String,
    /// Successfully decoded events
    pub events_processed: u64,
    /// Batches persisted
    pub batches_flushed: u64,
    /// Notifications published
    pub notifications_sent: u64,
    /// Messages skipped as malformed
    pub decode_failures: u64,
}

/// Drives one subscription until the shutdown token fires.
pub struct ConsumerGroupRunner {
    config: RunnerConfig,
    bus: Arc<dyn EventBus>,
    pipeline: Pipeline,
    shutdown: CancellationToken,
    state: RunnerState,
    report: RunnerReport,
}

impl ConsumerGroupRunner {
    /// Create a runner. Nothing happens until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn new(
        config: RunnerConfig,
        bus: Arc<dyn EventBus>,
        pipeline: Pipeline,
        shutdown: CancellationToken,
    ) -> Self {
        let report = RunnerReport {
            name: config.name.clone(),
            ..RunnerReport::default()
        };
        Self {
            config,
            bus,
            pipeline,
            shutdown,
            state: RunnerState::Idle,
            report,
        }
    }

    /// Run on a dedicated tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<RunnerReport> {
        tokio::spawn(self.run())
    }

    /// Subscribe, process and resubscribe until shutdown.
    pub async fn run(mut self) -> RunnerReport {
        tracing::info!(
            runner = %self.config.name,
            topic = self.config.topic(),
            group = %self.config.group,
            "Runner started"
        );

        while !self.shutdown.is_cancelled() {
            self.transition(RunnerState::Idle);

            let subscription = match self
                .bus
                .subscribe(self.config.topic(), &self.config.group)
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!(runner = %self.config.name, error = %e, "Failed to subscribe");
                    if self.pause_before_resubscribe().await {
                        continue;
                    }
                    break;
                }
            };
            tracing::debug!(runner = %self.config.name, "Subscribed");

            let outcome = match self.pipeline.clone() {
                Pipeline::Notify(fanout) => self.notify(subscription, &fanout).await,
                Pipeline::Count { sink, batch } => self.count(subscription, &sink, batch).await,
            };

            match outcome {
                Ok(()) => break,
                Err(e)
                    if e.class() == ErrorClass::Cancelled && self.shutdown.is_cancelled() =>
                {
                    tracing::warn!(
                        runner = %self.config.name,
                        "Unit of work abandoned after grace period, left for redelivery"
                    );
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        runner = %self.config.name,
                        error = %e,
                        "Unit of work failed, resubscribing for redelivery"
                    );
                    counter!("runner_resubscribes_total", "topic" => self.config.topic())
                        .increment(1);
                    if !self.pause_before_resubscribe().await {
                        break;
                    }
                }
            }
        }

        self.transition(RunnerState::Cancelled);
        tracing::info!(
            runner = %self.report.name,
            events_processed = self.report.events_processed,
            batches_flushed = self.report.batches_flushed,
            notifications_sent = self.report.notifications_sent,
            decode_failures = self.report.decode_failures,
            "Runner stopped"
        );
        self.report
    }

    /// Counter path. Returns `Ok` on shutdown after flushing and committing.
    async fn count(
        &mut self,
        mut subscription: Box<dyn Subscription>,
        sink: &CounterSink,
        config: BatchConfig,
    ) -> Result<()> {
        let mut accumulator = BatchAccumulator::new(config);
        let mut pending = Offsets::default();

        loop {
            if self.shutdown.is_cancelled() {
                if let Some(batch) = accumulator.flush() {
                    self.persist(sink, batch).await?;
                }
                self.commit(subscription.as_mut(), &mut pending).await;
                return Ok(());
            }

            let wait = accumulator
                .remaining_at(Instant::now())
                .map_or(self.config.fetch_timeout, |left| left.min(self.config.fetch_timeout));
            let chunk = self.poll(subscription.as_mut(), wait).await?;

            for message in &chunk {
                pending.record(message);
                let Some(event) = self.decode(message) else {
                    continue;
                };

                self.transition(RunnerState::Accumulating);
                if let Some(batch) = accumulator.accept(event) {
                    self.persist(sink, batch).await?;
                    self.commit(subscription.as_mut(), &mut pending).await;
                }
            }

            if let Some(batch) = accumulator.poll_expired() {
                self.persist(sink, batch).await?;
            }
            if accumulator.is_empty() {
                self.commit(subscription.as_mut(), &mut pending).await;
            }
        }
    }

    /// Notify path. Returns `Ok` on shutdown after committing the processed prefix.
    async fn notify(
        &mut self,
        mut subscription: Box<dyn Subscription>,
        fanout: &NotificationFanout,
    ) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let chunk = self.poll(subscription.as_mut(), self.config.fetch_timeout).await?;
            let mut processed = Offsets::default();

            for message in &chunk {
                if self.shutdown.is_cancelled() {
                    break;
                }

                if let Some(event) = self.decode(message) {
                    self.transition(RunnerState::Notifying);
                    match fanout.handle(&event).await {
                        Ok(sent) => self.report.notifications_sent += sent as u64,
                        Err(e) if e.class() == ErrorClass::Terminal => {
                            tracing::warn!(
                                runner = %self.config.name,
                                offset = message.offset,
                                error = %e,
                                "Skipping event that cannot be notified"
                            );
                        }
                        Err(e) => {
                            self.commit(subscription.as_mut(), &mut processed).await;
                            return Err(e);
                        }
                    }
                }
                processed.record(message);
            }

            self.commit(subscription.as_mut(), &mut processed).await;
        }
    }

    async fn poll(
        &mut self,
        subscription: &mut dyn Subscription,
        wait: Duration,
    ) -> Result<Vec<RawMessage>> {
        self.transition(RunnerState::Polling);
        let chunk = subscription
            .poll_chunk(self.config.max_poll_records, wait, &self.shutdown)
            .await?;

        if !chunk.is_empty() {
            counter!("messages_polled_total", "topic" => self.config.topic())
                .increment(chunk.len() as u64);
            self.transition(RunnerState::Decoding);
        }
        Ok(chunk)
    }

    fn decode(&mut self, message: &RawMessage) -> Option<DomainEvent> {
        match event::decode(self.config.kind, &message.payload) {
            Ok(event) => {
                self.report.events_processed += 1;
                Some(event)
            }
            Err(e) => {
                self.report.decode_failures += 1;
                counter!("decode_failures_total", "topic" => self.config.topic()).increment(1);
                tracing::warn!(
                    runner = %self.config.name,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Skipping malformed message"
                );
                None
            }
        }
    }

    async fn persist(&mut self, sink: &CounterSink, batch: Batch) -> Result<()> {
        let delta = reduce(self.config.kind, &batch.events);
        let calls = sink.apply(&delta).await?;

        self.report.batches_flushed += 1;
        let trigger = match batch.trigger {
            FlushTrigger::Size => "size",
            FlushTrigger::Window => "window",
            FlushTrigger::Shutdown => "shutdown",
        };
        counter!("batches_flushed_total", "topic" => self.config.topic(), "trigger" => trigger)
            .increment(1);
        counter!("events_aggregated_total", "topic" => self.config.topic())
            .increment(batch.len() as u64);
        tracing::info!(
            runner = %self.config.name,
            trigger,
            events = batch.len(),
            updates = calls,
            "Batch persisted"
        );
        Ok(())
    }

    async fn commit(&mut self, subscription: &mut dyn Subscription, offsets: &mut Offsets) {
        if offsets.is_empty() {
            return;
        }
        self.transition(RunnerState::Committing);

        match subscription.commit(offsets).await {
            Ok(()) => {
                counter!("offsets_committed_total", "topic" => self.config.topic()).increment(1);
                tracing::trace!(runner = %self.config.name, ?offsets, "Offsets committed");
                offsets.clear();
            }
            Err(e) => {
                // Pending offsets are kept and included in the next commit.
                counter!("commit_failures_total", "topic" => self.config.topic()).increment(1);
                tracing::warn!(runner = %self.config.name, error = %e, "Failed to commit offsets");
            }
        }
    }

    /// Wait out the resubscribe delay. Returns `false` if shutdown fired instead.
    async fn pause_before_resubscribe(&self) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(self.config.resubscribe_delay) => true,
        }
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state != next {
            tracing::trace!(
                runner = %self.config.name,
                from = ?self.state,
                to = ?next,
                "State transition"
            );
            self.state = next;
        }
    }
}
