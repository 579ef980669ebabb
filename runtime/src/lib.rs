//! # Snapshare Runtime
//!
//! The impure half of the snapshare worker: everything that talks to the
//! ports defined in `snapshare-core`.
//!
//! - [`retry`]: the retry-guarded persistence gateway
//! - [`sink`]: applies net deltas to the counter repository
//! - [`fanout`]: turns events into user notifications
//! - [`runner`]: one consumer-group runner per (topic, group)
//! - [`observe`]: span, latency and outcome logging for capability calls
//! - [`metrics`]: Prometheus exporter
//!
//! ## Example
//!
//! ```rust,ignore
//! let gateway = RetryGateway::new(RetryPolicy::default(), abort.clone());
//! let sink = Arc::new(CounterSink::new(counters, gateway));
//!
//! let runner = ConsumerGroupRunner::new(
//!     RunnerConfig::new(EventKind::ImageLiked, "group-2"),
//!     bus.clone(),
//!     Pipeline::Count { sink, batch: BatchConfig::likes() },
//!     shutdown.clone(),
//! );
//! let report = runner.spawn().await?;
//! ```

#![forbid(unsafe_code)]

pub mod fanout;
pub mod metrics;
pub mod observe;
pub mod retry;
pub mod runner;
pub mod sink;

pub use fanout::NotificationFanout;
pub use observe::Instrumented;
pub use retry::{RetryGateway, RetryPolicy};
pub use runner::{ConsumerGroupRunner, Pipeline, RunnerConfig, RunnerReport};
pub use sink::CounterSink;
