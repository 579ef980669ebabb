//! Reduction of a batch into net counter deltas.
//!
//! The aggregator turns a batch of same-kind events into one signed delta per
//! entity and counter. Summation is commutative and associative, so the order
//! of events inside a batch never changes the result.
//!
//! Follow events feed two independent projections from the same batch: the
//! followed user gains a follower, the follower gains someone to follow.
//!
//! ```
//! use snapshare_core::aggregate::{reduce, NetDelta};
//! use snapshare_core::event::{DomainEvent, EventKind, Timestamps, UserFollowed};
//! use snapshare_core::model::{EventId, UserId};
//!
//! let at = chrono::Utc::now();
//! let follow = |id, follower, following| DomainEvent::UserFollowed(UserFollowed {
//!     id: EventId(id),
//!     follower_id: UserId(follower),
//!     following_id: UserId(following),
//!     timestamps: Timestamps::created(at),
//! });
//!
//! let delta = reduce(EventKind::UserFollowed, &[follow(1, 1, 2), follow(2, 3, 2)]);
//! let NetDelta::Follow(follow_delta) = delta else { unreachable!() };
//! assert_eq!(follow_delta.followers[&UserId(2)], 2);
//! assert_eq!(follow_delta.following[&UserId(1)], 1);
//! assert_eq!(follow_delta.following[&UserId(3)], 1);
//! ```

use crate::event::{DomainEvent, EventKind};
use crate::model::{ImageId, UserId};
use std::collections::BTreeMap;

/// Net follow deltas of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FollowDelta {
    /// Follower-count delta, keyed by the followed user
    pub followers: BTreeMap<UserId, i64>,
    /// Following-count delta, keyed by the follower
    pub following: BTreeMap<UserId, i64>,
}

/// Which user-stat columns an update touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserStatUpdate {
    /// Only the follower count changes
    Follower(i64),
    /// Only the following count changes
    Following(i64),
    /// Both counts change in the same batch
    Both {
        /// Follower-count delta
        follower: i64,
        /// Following-count delta
        following: i64,
    },
}

impl FollowDelta {
    /// Whether the batch touched no user.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.followers.is_empty() && self.following.is_empty()
    }

    /// Route every touched user to exactly one update, ordered by user id.
    ///
    /// A user with non-zero deltas in both projections gets a single
    /// [`UserStatUpdate::Both`]. Otherwise the user gets the single-column
    /// update of its non-zero side, or a zero [`UserStatUpdate::Follower`]
    /// when both sides net out.
    #[must_use]
    pub fn updates(&self) -> Vec<(UserId, UserStatUpdate)> {
        let mut updates: BTreeMap<UserId, UserStatUpdate> = self
            .followers
            .iter()
            .map(|(user, delta)| (*user, UserStatUpdate::Follower(*delta)))
            .collect();

        for (user, following) in &self.following {
            let update = match updates.get(user) {
                Some(UserStatUpdate::Follower(follower)) if *follower != 0 && *following != 0 => {
                    UserStatUpdate::Both {
                        follower: *follower,
                        following: *following,
                    }
                }
                Some(UserStatUpdate::Follower(_)) if *following == 0 => continue,
                _ => UserStatUpdate::Following(*following),
            };
            updates.insert(*user, update);
        }

        updates.into_iter().collect()
    }
}

/// Net counter deltas of one batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetDelta {
    /// Follower / following counts per user
    Follow(FollowDelta),
    /// Like counts per image
    Likes(BTreeMap<ImageId, i64>),
    /// Comment counts per image
    Comments(BTreeMap<ImageId, i64>),
    /// The kind has no counters
    None,
}

impl NetDelta {
    /// Whether applying this delta would issue no persistence calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Follow(delta) => delta.is_empty(),
            Self::Likes(deltas) | Self::Comments(deltas) => deltas.is_empty(),
            Self::None => true,
        }
    }

    /// Number of persistence calls applying this delta issues.
    #[must_use]
    pub fn call_count(&self) -> usize {
        match self {
            Self::Follow(delta) => delta.updates().len(),
            Self::Likes(deltas) | Self::Comments(deltas) => deltas.len(),
            Self::None => 0,
        }
    }
}

/// Whether events of `kind` update counters.
#[must_use]
pub const fn has_counters(kind: EventKind) -> bool {
    !matches!(kind, EventKind::ImageUploaded)
}

/// Reduce the `kind` events of `batch` into net deltas.
///
/// Events of any other kind are ignored. Each event weighs +1, or -1 when it
/// carries `deletedAt`, so a delta equals the number of events for the entity
/// only when the batch holds no retractions.
#[must_use]
pub fn reduce(kind: EventKind, batch: &[DomainEvent]) -> NetDelta {
    match kind {
        EventKind::UserFollowed => {
            let mut delta = FollowDelta::default();
            for event in batch {
                if let DomainEvent::UserFollowed(followed) = event {
                    *delta.followers.entry(followed.following_id).or_insert(0) += event.weight();
                    *delta.following.entry(followed.follower_id).or_insert(0) += event.weight();
                }
            }
            NetDelta::Follow(delta)
        }
        EventKind::ImageLiked => {
            let mut deltas = BTreeMap::new();
            for event in batch {
                if let DomainEvent::ImageLiked(liked) = event {
                    *deltas.entry(liked.image_id).or_insert(0) += event.weight();
                }
            }
            NetDelta::Likes(deltas)
        }
        EventKind::ImageCommented => {
            let mut deltas = BTreeMap::new();
            for event in batch {
                if let DomainEvent::ImageCommented(commented) = event {
                    *deltas.entry(commented.image_id).or_insert(0) += event.weight();
                }
            }
            NetDelta::Comments(deltas)
        }
        EventKind::ImageUploaded => NetDelta::None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{ImageCommented, ImageLiked, ImageUploaded, Timestamps, UserFollowed};
    use crate::model::EventId;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn follow(follower: i64, following: i64) -> DomainEvent {
        DomainEvent::UserFollowed(UserFollowed {
            id: EventId(follower * 1000 + following),
            follower_id: UserId(follower),
            following_id: UserId(following),
            timestamps: Timestamps::created(at()),
        })
    }

    fn unfollow(follower: i64, following: i64) -> DomainEvent {
        DomainEvent::UserFollowed(UserFollowed {
            id: EventId(follower * 1000 + following),
            follower_id: UserId(follower),
            following_id: UserId(following),
            timestamps: Timestamps::deleted(at(), at()),
        })
    }

    fn like(image: i64) -> DomainEvent {
        DomainEvent::ImageLiked(ImageLiked {
            id: EventId(image),
            user_id: UserId(1),
            image_id: ImageId(image),
            timestamps: Timestamps::created(at()),
        })
    }

    fn comment(image: i64) -> DomainEvent {
        DomainEvent::ImageCommented(ImageCommented {
            id: EventId(image),
            user_id: UserId(1),
            image_id: ImageId(image),
            comment: "nice".to_string(),
            timestamps: Timestamps::created(at()),
        })
    }

    fn follow_delta(delta: NetDelta) -> FollowDelta {
        match delta {
            NetDelta::Follow(delta) => delta,
            other => unreachable!("expected follow delta, got {other:?}"),
        }
    }

    #[test]
    fn two_followers_of_one_user() {
        let delta = follow_delta(reduce(EventKind::UserFollowed, &[follow(1, 2), follow(3, 2)]));

        assert_eq!(delta.followers, BTreeMap::from([(UserId(2), 2)]));
        assert_eq!(delta.following, BTreeMap::from([(UserId(1), 1), (UserId(3), 1)]));
    }

    #[test]
    fn three_likes_of_one_image() {
        let delta = reduce(EventKind::ImageLiked, &[like(100), like(100), like(100)]);
        assert_eq!(delta, NetDelta::Likes(BTreeMap::from([(ImageId(100), 3)])));
        assert_eq!(delta.call_count(), 1);
    }

    #[test]
    fn comments_are_counted_per_image() {
        let delta = reduce(EventKind::ImageCommented, &[comment(1), comment(2), comment(1)]);
        assert_eq!(
            delta,
            NetDelta::Comments(BTreeMap::from([(ImageId(1), 2), (ImageId(2), 1)]))
        );
    }

    #[test]
    fn no_events_of_interest_is_empty() {
        let delta = reduce(EventKind::ImageLiked, &[comment(1), follow(1, 2)]);
        assert!(delta.is_empty());
        assert_eq!(delta.call_count(), 0);

        assert!(reduce(EventKind::UserFollowed, &[]).is_empty());
    }

    #[test]
    fn uploads_have_no_counters() {
        let upload = DomainEvent::ImageUploaded(ImageUploaded {
            id: ImageId(1),
            user_id: UserId(7),
            timestamps: Timestamps::created(at()),
        });
        assert_eq!(reduce(EventKind::ImageUploaded, &[upload]), NetDelta::None);
        assert!(!has_counters(EventKind::ImageUploaded));
        assert!(has_counters(EventKind::ImageLiked));
    }

    #[test]
    fn retraction_cancels_out_to_zero() {
        let delta = follow_delta(reduce(EventKind::UserFollowed, &[follow(1, 2), unfollow(1, 2)]));

        // Zero deltas are kept so they are still applied.
        assert_eq!(delta.followers, BTreeMap::from([(UserId(2), 0)]));
        assert_eq!(delta.following, BTreeMap::from([(UserId(1), 0)]));
        assert!(!delta.is_empty());
    }

    #[test]
    fn updates_route_by_presence() {
        // 1 follows 2, 2 follows 3: user 2 changes in both projections.
        let delta = follow_delta(reduce(EventKind::UserFollowed, &[follow(1, 2), follow(2, 3)]));

        assert_eq!(
            delta.updates(),
            vec![
                (UserId(1), UserStatUpdate::Following(1)),
                (UserId(2), UserStatUpdate::Both { follower: 1, following: 1 }),
                (UserId(3), UserStatUpdate::Follower(1)),
            ]
        );
    }

    #[test]
    fn zero_side_routes_to_single_column() {
        // 2 -> 3 is retracted and followed again: user 2 nets 0 following.
        let batch = [follow(1, 2), unfollow(2, 3), follow(2, 3)];
        let delta = follow_delta(reduce(EventKind::UserFollowed, &batch));
        assert_eq!(
            delta.updates(),
            vec![
                (UserId(1), UserStatUpdate::Following(1)),
                (UserId(2), UserStatUpdate::Follower(1)),
                (UserId(3), UserStatUpdate::Follower(0)),
            ]
        );

        // 1 -> 2 nets out: user 2 keeps only its following delta.
        let batch = [follow(2, 3), unfollow(1, 2), follow(1, 2)];
        let delta = follow_delta(reduce(EventKind::UserFollowed, &batch));
        assert_eq!(
            delta.updates(),
            vec![
                (UserId(1), UserStatUpdate::Following(0)),
                (UserId(2), UserStatUpdate::Following(1)),
                (UserId(3), UserStatUpdate::Follower(1)),
            ]
        );
    }

    proptest! {
        #[test]
        fn follow_reduction_is_order_independent(
            pairs in proptest::collection::vec((1i64..6, 1i64..6), 0..40),
            seed in any::<u64>(),
        ) {
            let events: Vec<DomainEvent> = pairs.iter().map(|(a, b)| follow(*a, *b)).collect();

            // Deterministic shuffle driven by the seed.
            let mut shuffled = events.clone();
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                #[allow(clippy::cast_possible_truncation)]
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }

            let original = follow_delta(reduce(EventKind::UserFollowed, &events));
            prop_assert_eq!(&original, &follow_delta(reduce(EventKind::UserFollowed, &shuffled)));

            for (user, delta) in &original.followers {
                let expected = pairs.iter().filter(|(_, following)| *following == user.get()).count();
                prop_assert_eq!(*delta, i64::try_from(expected).unwrap());
            }
            for (user, delta) in &original.following {
                let expected = pairs.iter().filter(|(follower, _)| *follower == user.get()).count();
                prop_assert_eq!(*delta, i64::try_from(expected).unwrap());
            }
        }
    }
}
