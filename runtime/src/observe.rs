//! Uniform observability for capability calls.
//!
//! [`Instrumented`] wraps any repository or publisher and routes every call
//! through [`observe`], which opens a span, records the call duration and logs
//! the outcome. The wrapper is composed once when the worker wires its
//! dependencies:
//!
//! ```rust,ignore
//! let users: Arc<dyn UserRepository> =
//!     Arc::new(Instrumented::new("users", PostgresUserRepository::new(pool.clone())));
//! ```

use futures::future::BoxFuture;
use metrics::{counter, histogram};
use snapshare_core::error::Result;
use snapshare_core::model::{Image, ImageId, NotifyEvent, User, UserId};
use snapshare_core::repository::{
    CounterRepository, FollowRepository, ImageRepository, NotificationPublisher, UserRepository,
};
use std::future::Future;
use tokio::time::Instant;
use tracing::Instrument;

/// Run `call` inside a span, recording its duration and outcome.
///
/// # Errors
///
/// Returns whatever `call` returns, unchanged.
pub async fn observe<T, F>(capability: &'static str, operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let span = tracing::debug_span!("capability", capability, operation);
    let start = Instant::now();
    let result = call.instrument(span.clone()).await;
    let elapsed = start.elapsed();

    histogram!(
        "capability_call_duration_seconds",
        "capability" => capability,
        "operation" => operation
    )
    .record(elapsed.as_secs_f64());

    match &result {
        Ok(_) => tracing::debug!(
            parent: &span,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Call succeeded"
        ),
        Err(err) => {
            counter!(
                "capability_call_errors_total",
                "capability" => capability,
                "operation" => operation
            )
            .increment(1);
            tracing::debug!(parent: &span, error = %err, "Call failed");
        }
    }

    result
}

/// A capability whose every call goes through [`observe`].
#[derive(Debug, Clone)]
pub struct Instrumented<T> {
    capability: &'static str,
    inner: T,
}

impl<T> Instrumented<T> {
    /// Wrap `inner`, labelling its calls with `capability`.
    #[must_use]
    pub const fn new(capability: &'static str, inner: T) -> Self {
        Self { capability, inner }
    }

    /// The wrapped capability.
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: CounterRepository> CounterRepository for Instrumented<T> {
    fn increment_follower_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(
            self.capability,
            "increment_follower_count",
            self.inner.increment_follower_count(user, delta),
        ))
    }

    fn increment_following_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(
            self.capability,
            "increment_following_count",
            self.inner.increment_following_count(user, delta),
        ))
    }

    fn increment_both(
        &self,
        user: UserId,
        follower_delta: i64,
        following_delta: i64,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(
            self.capability,
            "increment_both",
            self.inner.increment_both(user, follower_delta, following_delta),
        ))
    }

    fn increment_like_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(
            self.capability,
            "increment_like_count",
            self.inner.increment_like_count(image, delta),
        ))
    }

    fn increment_comment_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(
            self.capability,
            "increment_comment_count",
            self.inner.increment_comment_count(image, delta),
        ))
    }
}

impl<T: UserRepository> UserRepository for Instrumented<T> {
    fn find_by_id(&self, id: UserId) -> BoxFuture<'_, Result<User>> {
        Box::pin(observe(self.capability, "find_by_id", self.inner.find_by_id(id)))
    }
}

impl<T: ImageRepository> ImageRepository for Instrumented<T> {
    fn find_by_id(&self, id: ImageId) -> BoxFuture<'_, Result<Image>> {
        Box::pin(observe(self.capability, "find_by_id", self.inner.find_by_id(id)))
    }
}

impl<T: FollowRepository> FollowRepository for Instrumented<T> {
    fn followers_of(&self, user: UserId) -> BoxFuture<'_, Result<Vec<UserId>>> {
        Box::pin(observe(self.capability, "followers_of", self.inner.followers_of(user)))
    }
}

impl<T: NotificationPublisher> NotificationPublisher for Instrumented<T> {
    fn publish(&self, event: NotifyEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(observe(self.capability, "publish", self.inner.publish(event)))
    }
}
