//! `PostgreSQL` repositories for the snapshare worker.
//!
//! This crate implements the persistence ports of `snapshare-core` with sqlx:
//!
//! - [`PostgresCounterRepository`]: atomic `column = column + delta` increments
//! - [`PostgresUserRepository`], [`PostgresImageRepository`],
//!   [`PostgresFollowRepository`]: lookups used by the notification fan-out
//! - [`error`]: classification of sqlx errors into transient and terminal
//!
//! Repositories never retry. Errors are classified and returned so the retry
//! gateway (or broker redelivery) can decide what to do.
//!
//! # Example
//!
//! ```ignore
//! use snapshare_postgres::PostgresCounterRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/snapshare").await?;
//!     let counters = PostgresCounterRepository::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod counters;
pub mod error;
pub mod read_models;

pub use counters::PostgresCounterRepository;
pub use read_models::{PostgresFollowRepository, PostgresImageRepository, PostgresUserRepository};
