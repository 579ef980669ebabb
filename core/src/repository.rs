//! Persistence and notification ports used by the pipeline.
//!
//! The worker never talks to a database or broker directly. It depends on the
//! traits below, which are implemented by `snapshare-postgres` (sqlx),
//! `snapshare-redpanda` (rdkafka) and the in-memory doubles of
//! `snapshare-testing`.
//!
//! All traits return boxed futures so that implementations can be shared as
//! `Arc<dyn Trait>` across runners.

use crate::error::{PipelineError, Result};
use crate::event_bus::EventBus;
use crate::model::{Image, ImageId, NotifyEvent, User, UserId};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Topic outbound notifications are published to.
pub const NOTIFICATION_TOPIC: &str = "notification.created";

/// Atomic counter increments.
///
/// Every method issues a single `column = column + delta` statement scoped by
/// primary key, so concurrent callers cannot lose updates. Implementations do
/// not retry; errors are returned for classification by the caller.
pub trait CounterRepository: Send + Sync {
    /// Add `delta` to the follower count of `user`.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, classified as a [`PipelineError`].
    fn increment_follower_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>>;

    /// Add `delta` to the following count of `user`.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, classified as a [`PipelineError`].
    fn increment_following_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>>;

    /// Add both deltas to `user` in one statement.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, classified as a [`PipelineError`].
    fn increment_both(
        &self,
        user: UserId,
        follower_delta: i64,
        following_delta: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Add `delta` to the like count of `image`.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, classified as a [`PipelineError`].
    fn increment_like_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>>;

    /// Add `delta` to the comment count of `image`.
    ///
    /// # Errors
    ///
    /// Returns the persistence error, classified as a [`PipelineError`].
    fn increment_comment_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>>;
}

/// Read access to users.
pub trait UserRepository: Send + Sync {
    /// Load a user.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] if the user does not exist.
    fn find_by_id(&self, id: UserId) -> BoxFuture<'_, Result<User>>;
}

/// Read access to images.
pub trait ImageRepository: Send + Sync {
    /// Load an image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] if the image does not exist.
    fn find_by_id(&self, id: ImageId) -> BoxFuture<'_, Result<Image>>;
}

/// Read access to the follow graph.
pub trait FollowRepository: Send + Sync {
    /// Current followers of `user`.
    ///
    /// # Errors
    ///
    /// Returns the persistence error.
    fn followers_of(&self, user: UserId) -> BoxFuture<'_, Result<Vec<UserId>>>;
}

/// Outbound notification sink.
pub trait NotificationPublisher: Send + Sync {
    /// Publish one notification.
    ///
    /// # Errors
    ///
    /// Returns the broker error.
    fn publish(&self, event: NotifyEvent) -> BoxFuture<'_, Result<()>>;
}

/// [`NotificationPublisher`] that writes JSON notifications to an [`EventBus`]
/// topic, keyed by recipient so one user's notifications stay ordered.
#[derive(Clone)]
pub struct EventBusNotificationPublisher {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl EventBusNotificationPublisher {
    /// Publish to [`NOTIFICATION_TOPIC`].
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_topic(bus, NOTIFICATION_TOPIC)
    }

    /// Publish to a custom topic.
    #[must_use]
    pub fn with_topic(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Topic notifications are written to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl NotificationPublisher for EventBusNotificationPublisher {
    fn publish(&self, event: NotifyEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&event)
                .map_err(|e| PipelineError::Validation(format!("Failed to encode notification: {e}")))?;
            let key = event.user_id.to_string();
            self.bus
                .publish(&self.topic, Some(key.as_bytes()), &payload)
                .await?;
            Ok(())
        })
    }
}

impl<T: CounterRepository + ?Sized> CounterRepository for Arc<T> {
    fn increment_follower_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        (**self).increment_follower_count(user, delta)
    }

    fn increment_following_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        (**self).increment_following_count(user, delta)
    }

    fn increment_both(
        &self,
        user: UserId,
        follower_delta: i64,
        following_delta: i64,
    ) -> BoxFuture<'_, Result<()>> {
        (**self).increment_both(user, follower_delta, following_delta)
    }

    fn increment_like_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        (**self).increment_like_count(image, delta)
    }

    fn increment_comment_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        (**self).increment_comment_count(image, delta)
    }
}

impl<T: UserRepository + ?Sized> UserRepository for Arc<T> {
    fn find_by_id(&self, id: UserId) -> BoxFuture<'_, Result<User>> {
        (**self).find_by_id(id)
    }
}

impl<T: ImageRepository + ?Sized> ImageRepository for Arc<T> {
    fn find_by_id(&self, id: ImageId) -> BoxFuture<'_, Result<Image>> {
        (**self).find_by_id(id)
    }
}

impl<T: FollowRepository + ?Sized> FollowRepository for Arc<T> {
    fn followers_of(&self, user: UserId) -> BoxFuture<'_, Result<Vec<UserId>>> {
        (**self).followers_of(user)
    }
}

impl<T: NotificationPublisher + ?Sized> NotificationPublisher for Arc<T> {
    fn publish(&self, event: NotifyEvent) -> BoxFuture<'_, Result<()>> {
        (**self).publish(event)
    }
}
