//! Error taxonomy of the pipeline and its retry classification.
//!
//! Every failure the worker can observe is a [`PipelineError`]. What the
//! pipeline does with it depends only on its [`ErrorClass`]:
//!
//! | Class | Examples | Handling |
//! |---|---|---|
//! | `Transient` | connection reset, pool timeout, publish failure | retried by the gateway, unit of work redelivered if retries run out |
//! | `Cancelled` | shutdown abort | propagated immediately |
//! | `Terminal` | constraint violation, not found, validation | propagated immediately |

use crate::event::DecodeError;
use crate::event_bus::EventBusError;
use thiserror::Error;

/// How an error should be treated by retry logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Infrastructure flakiness, expected to succeed on retry
    Transient,
    /// The caller abandoned the work, never retried
    Cancelled,
    /// A logic or data problem, retrying cannot help
    Terminal,
}

/// Errors that know their own [`ErrorClass`].
pub trait Classify {
    /// Classify this error for retry purposes.
    fn class(&self) -> ErrorClass;
}

/// Errors raised while processing events.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A single message could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Structurally valid input that is semantically invalid
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity type (e.g. "user", "image")
        entity: &'static str,
        /// Entity id
        id: i64,
    },

    /// Network timeout, connection reset or refused
    #[error("Transient infrastructure failure: {0}")]
    Transient(String),

    /// Work was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Persistence failure that retrying cannot fix
    #[error("Storage error: {0}")]
    Storage(String),

    /// Some outbound notifications could not be published
    #[error("Failed to publish {failed} of {total} notifications: {reason}")]
    Publish {
        /// Number of failed publishes
        failed: usize,
        /// Number of attempted publishes
        total: usize,
        /// First failure reason
        reason: String,
    },

    /// Broker failure
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::NotFound`].
    #[must_use]
    pub const fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

impl Classify for PipelineError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) | Self::Publish { .. } => ErrorClass::Transient,
            Self::Bus(bus) => bus.class(),
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Decode(_) | Self::Validation(_) | Self::NotFound { .. } | Self::Storage(_) => {
                ErrorClass::Terminal
            }
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
