//! Count- and time-bounded batching of decoded events.
//!
//! A [`BatchAccumulator`] collects events from one subscription until either
//! `max_size` events are buffered or `window` has elapsed since the first
//! event of the window, whichever comes first. Each trigger emits exactly one
//! [`Batch`] and resets the accumulator.
//!
//! The window opens on the first event, so an idle subscription never
//! produces empty batches. Time is measured with [`tokio::time::Instant`],
//! which lets tests drive windows with a paused clock.
//!
//! # Example
//!
//! ```
//! use snapshare_core::batch::{BatchAccumulator, BatchConfig, FlushTrigger};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let config = BatchConfig::new(2, Duration::from_secs(10)).unwrap();
//! let mut accumulator = BatchAccumulator::new(config);
//! let start = Instant::now();
//!
//! assert!(accumulator.accept_at("a", start).is_none());
//! let batch = accumulator.accept_at("b", start).unwrap();
//! assert_eq!(batch.trigger, FlushTrigger::Size);
//! assert_eq!(batch.events, vec!["a", "b"]);
//! assert!(accumulator.is_empty());
//! ```

use crate::error::PipelineError;
use crate::event::DomainEvent;
use std::time::Duration;
use tokio::time::Instant;

/// Per-subscription batching thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush once this many events are buffered
    pub max_size: usize,
    /// Flush once this much time has passed since the window opened
    pub window: Duration,
}

impl BatchConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] if `max_size` is zero or `window`
    /// is zero.
    pub fn new(max_size: usize, window: Duration) -> Result<Self, PipelineError> {
        if max_size == 0 {
            return Err(PipelineError::Validation(
                "batch max_size must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(PipelineError::Validation(
                "batch window must be greater than 0".to_string(),
            ));
        }
        Ok(Self { max_size, window })
    }

    /// Default thresholds for follow counters: 10 events / 10s.
    #[must_use]
    pub const fn follows() -> Self {
        Self {
            max_size: 10,
            window: Duration::from_secs(10),
        }
    }

    /// Default thresholds for like counters: 10 events / 10s.
    #[must_use]
    pub const fn likes() -> Self {
        Self {
            max_size: 10,
            window: Duration::from_secs(10),
        }
    }

    /// Default thresholds for comment counters: 10 events / 18s.
    #[must_use]
    pub const fn comments() -> Self {
        Self {
            max_size: 10,
            window: Duration::from_secs(18),
        }
    }
}

/// Why a batch was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTrigger {
    /// `max_size` events were buffered
    Size,
    /// The time window elapsed
    Window,
    /// The runner is shutting down
    Shutdown,
}

/// Events collected within one trigger window, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch<E = DomainEvent> {
    /// Buffered events
    pub events: Vec<E>,
    /// What closed the window
    pub trigger: FlushTrigger,
}

impl<E> Batch<E> {
    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Accumulates events until a size or time threshold is crossed.
#[derive(Debug)]
pub struct BatchAccumulator<E = DomainEvent> {
    config: BatchConfig,
    events: Vec<E>,
    window_start: Option<Instant>,
}

impl<E> BatchAccumulator<E> {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            events: Vec::with_capacity(config.max_size),
            window_start: None,
        }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn config(&self) -> BatchConfig {
        self.config
    }

    /// Add an event, returning a batch if a threshold is now crossed.
    pub fn accept(&mut self, event: E) -> Option<Batch<E>> {
        self.accept_at(event, Instant::now())
    }

    /// Add an event observed at `now`.
    pub fn accept_at(&mut self, event: E, now: Instant) -> Option<Batch<E>> {
        if self.events.is_empty() {
            self.window_start = Some(now);
        }
        self.events.push(event);

        if self.events.len() >= self.config.max_size {
            return self.take(FlushTrigger::Size);
        }
        if self.is_expired_at(now) {
            return self.take(FlushTrigger::Window);
        }
        None
    }

    /// When the open window expires, if one is open.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.window_start.map(|start| start + self.config.window)
    }

    /// Time left until the open window expires (zero if already expired).
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Emit the buffered events if the window has expired.
    pub fn poll_expired(&mut self) -> Option<Batch<E>> {
        self.poll_expired_at(Instant::now())
    }

    /// Emit the buffered events if the window has expired at `now`.
    pub fn poll_expired_at(&mut self, now: Instant) -> Option<Batch<E>> {
        if self.is_expired_at(now) {
            self.take(FlushTrigger::Window)
        } else {
            None
        }
    }

    /// Emit whatever is buffered, regardless of thresholds.
    pub fn flush(&mut self) -> Option<Batch<E>> {
        self.take(FlushTrigger::Shutdown)
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        !self.events.is_empty() && self.deadline().is_some_and(|deadline| now >= deadline)
    }

    fn take(&mut self, trigger: FlushTrigger) -> Option<Batch<E>> {
        if self.events.is_empty() {
            return None;
        }
        self.window_start = None;
        let events = std::mem::replace(&mut self.events, Vec::with_capacity(self.config.max_size));
        Some(Batch { events, trigger })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(max_size: usize, window_secs: u64) -> BatchConfig {
        BatchConfig::new(max_size, Duration::from_secs(window_secs)).unwrap()
    }

    #[test]
    fn rejects_degenerate_config() {
        assert!(BatchConfig::new(0, Duration::from_secs(1)).is_err());
        assert!(BatchConfig::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn defaults_match_subscription_table() {
        assert_eq!(BatchConfig::follows(), config(10, 10));
        assert_eq!(BatchConfig::likes(), config(10, 10));
        assert_eq!(BatchConfig::comments(), config(10, 18));
    }

    #[test]
    fn emits_on_size_and_not_before() {
        let mut acc = BatchAccumulator::new(config(3, 10));
        let t0 = Instant::now();

        assert!(acc.accept_at(1, t0).is_none());
        assert!(acc.accept_at(2, t0).is_none());
        let batch = acc.accept_at(3, t0).unwrap();

        assert_eq!(batch.events, vec![1, 2, 3]);
        assert_eq!(batch.trigger, FlushTrigger::Size);
        assert!(acc.is_empty());
        assert!(acc.deadline().is_none());
    }

    #[test]
    fn emits_on_window_and_not_before() {
        let mut acc = BatchAccumulator::new(config(10, 10));
        let t0 = Instant::now();

        assert!(acc.accept_at(1, t0).is_none());
        assert!(acc.poll_expired_at(t0 + Duration::from_millis(9_999)).is_none());

        let batch = acc.poll_expired_at(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(batch.events, vec![1]);
        assert_eq!(batch.trigger, FlushTrigger::Window);
    }

    #[test]
    fn late_event_joins_expired_window() {
        let mut acc = BatchAccumulator::new(config(10, 10));
        let t0 = Instant::now();

        acc.accept_at(1, t0);
        let batch = acc.accept_at(2, t0 + Duration::from_secs(11)).unwrap();
        assert_eq!(batch.events, vec![1, 2]);
        assert_eq!(batch.trigger, FlushTrigger::Window);
    }

    #[test]
    fn window_opens_on_first_event() {
        let mut acc: BatchAccumulator<u32> = BatchAccumulator::new(config(10, 10));
        let t0 = Instant::now();

        assert!(acc.deadline().is_none());
        assert!(acc.poll_expired_at(t0 + Duration::from_secs(60)).is_none());

        let t1 = t0 + Duration::from_secs(60);
        acc.accept_at(7, t1);
        assert_eq!(acc.deadline(), Some(t1 + Duration::from_secs(10)));
        assert_eq!(acc.remaining_at(t1 + Duration::from_secs(4)), Some(Duration::from_secs(6)));
        assert_eq!(acc.remaining_at(t1 + Duration::from_secs(40)), Some(Duration::ZERO));
    }

    #[test]
    fn flush_emits_partial_batch_once() {
        let mut acc = BatchAccumulator::new(config(10, 10));
        acc.accept_at("x", Instant::now());

        let batch = acc.flush().unwrap();
        assert_eq!(batch.trigger, FlushTrigger::Shutdown);
        assert_eq!(batch.len(), 1);
        assert!(acc.flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_tokio_clock() {
        let mut acc = BatchAccumulator::new(config(10, 18));
        acc.accept("comment");

        tokio::time::advance(Duration::from_secs(17)).await;
        assert!(acc.poll_expired().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(acc.poll_expired().unwrap().events, vec!["comment"]);
    }
}
