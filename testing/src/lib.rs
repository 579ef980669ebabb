//! # Snapshare Testing
//!
//! Test doubles and helpers for the snapshare worker.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: topics, consumer groups and committed offsets
//! - [`InMemoryCounterRepository`]: call recording and fault injection
//! - [`InMemoryDirectory`]: users, images and the follow graph
//! - [`RecordingPublisher`]: captured notifications
//! - [`LogCapture`]: a `tracing` layer for assertions on log output
//! - [`fixtures`]: event builders with fixed timestamps
//!
//! ## Example
//!
//! ```ignore
//! #[tokio::test(start_paused = true)]
//! async fn likes_are_counted() {
//!     let bus = InMemoryEventBus::new();
//!     let counters = InMemoryCounterRepository::new();
//!     for id in 1..=3 {
//!         bus.push_event(&fixtures::liked(id, 1, 100));
//!     }
//!
//!     // run a counter runner over `bus` and `counters`...
//!
//!     assert_eq!(counters.calls(), vec![CounterCall::Like(ImageId(100), 3)]);
//! }
//! ```

pub mod event_bus;
pub mod fixtures;
pub mod log_capture;
pub mod repositories;

// Re-export commonly used items
pub use event_bus::{InMemoryEventBus, InMemorySubscription};
pub use log_capture::{CapturedEvent, LogCapture};
pub use repositories::{
    CounterCall, Fault, InMemoryCounterRepository, InMemoryDirectory, RecordingPublisher,
};
