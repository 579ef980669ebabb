//! Identifiers and read models shared by the pipeline.
//!
//! Identifiers are newtypes over `i64` so that a user id can never be passed
//! where an image id is expected. They serialize transparently, matching the
//! plain numeric ids found in event payloads and database rows.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// The raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifier of a user account.
    UserId
);
id_type!(
    /// Identifier of an uploaded image.
    ImageId
);
id_type!(
    /// Identifier of the row a domain event describes (follow, like, comment).
    EventId
);

/// A user as seen by the notification fan-out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Public handle used in notification messages
    pub username: String,
}

/// Image row with its aggregated counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id
    pub id: ImageId,
    /// Owner of the image
    pub user_id: UserId,
    /// Number of likes
    pub like_count: i64,
    /// Number of comments
    pub comment_count: i64,
}

/// Per-user follow counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStat {
    /// User id
    pub user_id: UserId,
    /// How many users follow this user
    pub follower_count: i64,
    /// How many users this user follows
    pub following_count: i64,
}

/// Outbound notification, one per recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvent {
    /// Recipient
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Human-readable message
    pub message: String,
}

impl NotifyEvent {
    /// Create a notification for `user_id`.
    #[must_use]
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
        }
    }
}
