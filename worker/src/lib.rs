//! The snapshare worker.
//!
//! Consumes `user.followed`, `image.liked`, `image.commented` and
//! `image.uploaded` from Redpanda. One set of consumer groups fans
//! notifications out to followers and content owners; the other aggregates
//! events into batches and applies net counter increments in `PostgreSQL`.
//!
//! The binary wires [`config::Config`] into a [`supervisor::Supervisor`] that
//! runs one runner per row of [`subscriptions::subscription_table`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod subscriptions;
pub mod supervisor;

pub use config::Config;
pub use subscriptions::{Capabilities, subscription_table};
pub use supervisor::{ABORT_DEADLINE, Supervisor, shutdown_signal};
