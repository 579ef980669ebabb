//! Domain events and the envelope decoder.
//!
//! Domain events are immutable facts published by the API service after a
//! follow, like, comment or upload has been persisted. Each kind lives on its
//! own topic and is encoded as JSON:
//!
//! ```json
//! {
//!   "id": 12,
//!   "followerID": 1,
//!   "followingID": 2,
//!   "createdAt": "2025-01-01T00:00:00Z",
//!   "updatedAt": "2025-01-01T00:00:00Z",
//!   "deletedAt": null
//! }
//! ```
//!
//! # Decoding
//!
//! [`decode`] turns one raw payload into a typed [`DomainEvent`]. It is a pure
//! function: a malformed payload produces a [`DecodeError`] naming the kind and
//! the parse failure, and the caller decides what to do with it (the runner
//! logs it and moves on to the next message).
//!
//! ```
//! use snapshare_core::event::{decode, DomainEvent, EventKind};
//!
//! let raw = br#"{"id":1,"userID":7,"imageID":100,
//!     "createdAt":"2025-01-01T00:00:00Z","updatedAt":"2025-01-01T00:00:00Z"}"#;
//!
//! let event = decode(EventKind::ImageLiked, raw).unwrap();
//! assert!(matches!(event, DomainEvent::ImageLiked(ref liked) if liked.image_id.get() == 100));
//!
//! assert!(decode(EventKind::ImageLiked, b"{not json").is_err());
//! ```

use crate::model::{EventId, ImageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a payload cannot be decoded into the expected event kind.
#[derive(Error, Debug)]
#[error("Failed to decode {kind} event: {source}")]
pub struct DecodeError {
    /// Kind the payload was expected to be
    pub kind: EventKind,
    /// Underlying parse failure
    #[source]
    pub source: serde_json::Error,
}

/// The kinds of domain events the worker consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A user started (or stopped) following another user
    UserFollowed,
    /// A user liked (or unliked) an image
    ImageLiked,
    /// A user commented on an image
    ImageCommented,
    /// A user uploaded a new image
    ImageUploaded,
}

impl EventKind {
    /// Every kind, in topic order.
    pub const ALL: [Self; 4] = [
        Self::UserFollowed,
        Self::ImageLiked,
        Self::ImageCommented,
        Self::ImageUploaded,
    ];

    /// Broker topic this kind is published on.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::UserFollowed => "user.followed",
            Self::ImageLiked => "image.liked",
            Self::ImageCommented => "image.commented",
            Self::ImageUploaded => "image.uploaded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.topic() == s)
            .ok_or_else(|| format!("unknown event topic: {s}"))
    }
}

/// Row timestamps carried by every event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    /// When the row was created
    pub created_at: DateTime<Utc>,
    /// When the row was last updated
    pub updated_at: DateTime<Utc>,
    /// Set when the row was soft-deleted (the event is a retraction)
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// Timestamps for a freshly created row.
    #[must_use]
    pub const fn created(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    /// Timestamps for a row deleted at `at`.
    #[must_use]
    pub const fn deleted(created_at: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            updated_at: at,
            deleted_at: Some(at),
        }
    }
}

/// `follower_id` now follows `following_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFollowed {
    /// Follow row id
    pub id: EventId,
    /// The user who followed
    #[serde(rename = "followerID")]
    pub follower_id: UserId,
    /// The user being followed
    #[serde(rename = "followingID")]
    pub following_id: UserId,
    /// Row timestamps
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// `user_id` liked `image_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLiked {
    /// Like row id
    pub id: EventId,
    /// The user who liked
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// The liked image
    #[serde(rename = "imageID")]
    pub image_id: ImageId,
    /// Row timestamps
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// `user_id` commented on `image_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCommented {
    /// Comment row id
    pub id: EventId,
    /// The commenter
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// The commented image
    #[serde(rename = "imageID")]
    pub image_id: ImageId,
    /// Comment text
    pub comment: String,
    /// Row timestamps
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// `user_id` uploaded the image `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUploaded {
    /// The uploaded image
    pub id: ImageId,
    /// The uploader
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Row timestamps
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// A decoded domain event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`UserFollowed`]
    UserFollowed(UserFollowed),
    /// See [`ImageLiked`]
    ImageLiked(ImageLiked),
    /// See [`ImageCommented`]
    ImageCommented(ImageCommented),
    /// See [`ImageUploaded`]
    ImageUploaded(ImageUploaded),
}

impl DomainEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::UserFollowed(_) => EventKind::UserFollowed,
            Self::ImageLiked(_) => EventKind::ImageLiked,
            Self::ImageCommented(_) => EventKind::ImageCommented,
            Self::ImageUploaded(_) => EventKind::ImageUploaded,
        }
    }

    /// Row timestamps of the event.
    #[must_use]
    pub const fn timestamps(&self) -> &Timestamps {
        match self {
            Self::UserFollowed(e) => &e.timestamps,
            Self::ImageLiked(e) => &e.timestamps,
            Self::ImageCommented(e) => &e.timestamps,
            Self::ImageUploaded(e) => &e.timestamps,
        }
    }

    /// Whether the event undoes an earlier one (unfollow, unlike, removed comment).
    #[must_use]
    pub const fn is_retraction(&self) -> bool {
        self.timestamps().deleted_at.is_some()
    }

    /// Signed contribution of this event to its counters: `-1` for a
    /// retraction, `+1` otherwise.
    #[must_use]
    pub const fn weight(&self) -> i64 {
        if self.is_retraction() { -1 } else { 1 }
    }

    /// Encode the event back to its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::UserFollowed(e) => serde_json::to_vec(e),
            Self::ImageLiked(e) => serde_json::to_vec(e),
            Self::ImageCommented(e) => serde_json::to_vec(e),
            Self::ImageUploaded(e) => serde_json::to_vec(e),
        }
    }
}

/// Decode a raw payload into the typed event for `kind`.
///
/// # Errors
///
/// Returns [`DecodeError`] if the payload is not valid JSON or does not have
/// the shape of `kind`.
pub fn decode(kind: EventKind, raw: &[u8]) -> Result<DomainEvent, DecodeError> {
    let wrap = |source| DecodeError { kind, source };
    let event = match kind {
        EventKind::UserFollowed => DomainEvent::UserFollowed(serde_json::from_slice(raw).map_err(wrap)?),
        EventKind::ImageLiked => DomainEvent::ImageLiked(serde_json::from_slice(raw).map_err(wrap)?),
        EventKind::ImageCommented => {
            DomainEvent::ImageCommented(serde_json::from_slice(raw).map_err(wrap)?)
        }
        EventKind::ImageUploaded => {
            DomainEvent::ImageUploaded(serde_json::from_slice(raw).map_err(wrap)?)
        }
    };
    Ok(event)
}
