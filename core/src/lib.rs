//! # Snapshare Core
//!
//! Domain types and ports for the snapshare worker: the process that reacts to
//! follow, like, comment and upload events by maintaining aggregated counters
//! and fanning out user notifications.
//!
//! ## Pipeline
//!
//! ```text
//! raw message ──► decode ──► BatchAccumulator ──► reduce ──► NetDelta ──► CounterRepository
//!                    │
//!                    └──────► notification fan-out ──► NotificationPublisher
//! ```
//!
//! This crate holds the pure parts of that pipeline and the traits the impure
//! parts are written against:
//!
//! - [`event`]: domain events and the envelope decoder
//! - [`batch`]: count/time-bounded batching
//! - [`aggregate`]: reduction of a batch into net deltas
//! - [`error`]: the error taxonomy and retry classification
//! - [`event_bus`]: broker subscription and publish traits
//! - [`repository`]: counter, read-model and notification ports
//! - [`model`]: identifiers and read models

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod model;
pub mod repository;

pub use error::{Classify, ErrorClass, PipelineError};
pub use event::{DomainEvent, EventKind};
