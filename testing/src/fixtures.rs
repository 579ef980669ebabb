//! Event builders with deterministic ids and timestamps.

#![allow(clippy::expect_used)]

use chrono::{DateTime, Utc};
use snapshare_core::event::{
    DomainEvent, ImageCommented, ImageLiked, ImageUploaded, Timestamps, UserFollowed,
};
use snapshare_core::model::{EventId, ImageId, UserId};

/// Fixed timestamp used by every fixture (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Never in practice: the timestamp is a valid RFC 3339 literal.
#[must_use]
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

/// `follower` starts following `following`.
#[must_use]
pub fn followed(id: i64, follower: i64, following: i64) -> DomainEvent {
    DomainEvent::UserFollowed(UserFollowed {
        id: EventId(id),
        follower_id: UserId(follower),
        following_id: UserId(following),
        timestamps: Timestamps::created(fixed_time()),
    })
}

/// `follower` stops following `following`.
#[must_use]
pub fn unfollowed(id: i64, follower: i64, following: i64) -> DomainEvent {
    DomainEvent::UserFollowed(UserFollowed {
        id: EventId(id),
        follower_id: UserId(follower),
        following_id: UserId(following),
        timestamps: Timestamps::deleted(fixed_time(), fixed_time()),
    })
}

/// `user` likes `image`.
#[must_use]
pub fn liked(id: i64, user: i64, image: i64) -> DomainEvent {
    DomainEvent::ImageLiked(ImageLiked {
        id: EventId(id),
        user_id: UserId(user),
        image_id: ImageId(image),
        timestamps: Timestamps::created(fixed_time()),
    })
}

/// `user` takes back a like of `image`.
#[must_use]
pub fn unliked(id: i64, user: i64, image: i64) -> DomainEvent {
    DomainEvent::ImageLiked(ImageLiked {
        id: EventId(id),
        user_id: UserId(user),
        image_id: ImageId(image),
        timestamps: Timestamps::deleted(fixed_time(), fixed_time()),
    })
}

/// `user` comments `text` on `image`.
#[must_use]
pub fn commented(id: i64, user: i64, image: i64, text: &str) -> DomainEvent {
    DomainEvent::ImageCommented(ImageCommented {
        id: EventId(id),
        user_id: UserId(user),
        image_id: ImageId(image),
        comment: text.to_string(),
        timestamps: Timestamps::created(fixed_time()),
    })
}

/// `user` uploads `image`.
#[must_use]
pub fn uploaded(image: i64, user: i64) -> DomainEvent {
    DomainEvent::ImageUploaded(ImageUploaded {
        id: ImageId(image),
        user_id: UserId(user),
        timestamps: Timestamps::created(fixed_time()),
    })
}
