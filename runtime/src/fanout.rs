//! Notification fan-out.
//!
//! Turns one domain event into the notifications it implies:
//!
//! | Event | Actor | Audience | Message |
//! |---|---|---|---|
//! | `ImageUploaded` | uploader | all current followers | `<username> just upload an image` |
//! | `UserFollowed` | follower | the followed user | `<username> started following you` |
//! | `ImageLiked` | liker | the image owner | `<username> liked your image` |
//! | `ImageCommented` | commenter | the image owner | `<username> commented on your image: <comment>` |
//!
//! Retractions notify nobody, and the actor is never notified about their own
//! action.

use metrics::counter;
use snapshare_core::error::{PipelineError, Result};
use snapshare_core::event::{DomainEvent, ImageCommented, ImageLiked, ImageUploaded, UserFollowed};
use snapshare_core::model::{NotifyEvent, UserId};
use snapshare_core::repository::{
    FollowRepository, ImageRepository, NotificationPublisher, UserRepository,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Resolves actors and audiences, then publishes one notification per recipient.
#[derive(Clone)]
pub struct NotificationFanout {
    users: Arc<dyn UserRepository>,
    images: Arc<dyn ImageRepository>,
    follows: Arc<dyn FollowRepository>,
    publisher: Arc<dyn NotificationPublisher>,
}

impl NotificationFanout {
    /// Create a fan-out over the given read models and publisher.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        images: Arc<dyn ImageRepository>,
        follows: Arc<dyn FollowRepository>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            users,
            images,
            follows,
            publisher,
        }
    }

    /// Publish the notifications `event` implies.
    ///
    /// Returns the number of notifications sent.
    ///
    /// # Errors
    ///
    /// - Resolution errors (e.g. [`PipelineError::NotFound`]) if the actor,
    ///   image or audience cannot be loaded; nothing is sent in that case.
    /// - [`PipelineError::Publish`] if any recipient could not be notified.
    ///   Every recipient is attempted first.
    pub async fn handle(&self, event: &DomainEvent) -> Result<usize> {
        if event.is_retraction() {
            tracing::debug!(kind = %event.kind(), "Retraction, no notification");
            return Ok(0);
        }

        match event {
            DomainEvent::ImageUploaded(uploaded) => self.image_uploaded(uploaded).await,
            DomainEvent::UserFollowed(followed) => self.user_followed(followed).await,
            DomainEvent::ImageLiked(liked) => self.image_liked(liked).await,
            DomainEvent::ImageCommented(commented) => self.image_commented(commented).await,
        }
    }

    async fn image_uploaded(&self, event: &ImageUploaded) -> Result<usize> {
        let uploader = self.users.find_by_id(event.user_id).await?;
        let followers = self.follows.followers_of(event.user_id).await?;

        let message = format!("{} just upload an image", uploader.username);
        self.deliver(uploader.id, followers, &message).await
    }

    async fn user_followed(&self, event: &UserFollowed) -> Result<usize> {
        let follower = self.users.find_by_id(event.follower_id).await?;

        let message = format!("{} started following you", follower.username);
        self.deliver(follower.id, vec![event.following_id], &message)
            .await
    }

    async fn image_liked(&self, event: &ImageLiked) -> Result<usize> {
        let liker = self.users.find_by_id(event.user_id).await?;
        let image = self.images.find_by_id(event.image_id).await?;

        let message = format!("{} liked your image", liker.username);
        self.deliver(liker.id, vec![image.user_id], &message).await
    }

    async fn image_commented(&self, event: &ImageCommented) -> Result<usize> {
        let commenter = self.users.find_by_id(event.user_id).await?;
        let image = self.images.find_by_id(event.image_id).await?;

        let message = format!(
            "{} commented on your image: {}",
            commenter.username, event.comment
        );
        self.deliver(commenter.id, vec![image.user_id], &message)
            .await
    }

    async fn deliver(&self, actor: UserId, audience: Vec<UserId>, message: &str) -> Result<usize> {
        let mut seen = HashSet::new();
        let recipients: Vec<UserId> = audience
            .into_iter()
            .filter(|user| *user != actor && seen.insert(*user))
            .collect();

        let total = recipients.len();
        let mut failed = 0;
        let mut first_failure = None;

        for recipient in recipients {
            if let Err(err) = self
                .publisher
                .publish(NotifyEvent::new(recipient, message))
                .await
            {
                tracing::warn!(
                    recipient = %recipient,
                    error = %err,
                    "Failed to publish notification"
                );
                failed += 1;
                first_failure.get_or_insert_with(|| err.to_string());
            }
        }

        let sent = total - failed;
        counter!("notifications_sent_total").increment(sent as u64);

        if let Some(reason) = first_failure {
            counter!("notifications_failed_total").increment(failed as u64);
            return Err(PipelineError::Publish {
                failed,
                total,
                reason,
            });
        }

        tracing::debug!(actor = %actor, sent, "Notifications published");
        Ok(sent)
    }
}
