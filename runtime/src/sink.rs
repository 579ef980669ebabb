//! Applies net deltas to the counter repository.

use crate::retry::RetryGateway;
use metrics::counter;
use snapshare_core::aggregate::{NetDelta, UserStatUpdate};
use snapshare_core::error::Result;
use snapshare_core::repository::CounterRepository;
use std::sync::Arc;

/// Writes [`NetDelta`]s through a [`RetryGateway`], one atomic call per entity.
#[derive(Clone)]
pub struct CounterSink {
    repository: Arc<dyn CounterRepository>,
    gateway: RetryGateway,
}

impl CounterSink {
    /// Create a sink over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn CounterRepository>, gateway: RetryGateway) -> Self {
        Self {
            repository,
            gateway,
        }
    }

    /// Persist every entry of `delta`, in entity order.
    ///
    /// Stops at the first failure. Calls that already succeeded are not undone,
    /// so the caller must not commit and should let the batch be redelivered.
    /// Returns the number of persistence calls made.
    ///
    /// # Errors
    ///
    /// Returns the first error the gateway gives up on.
    pub async fn apply(&self, delta: &NetDelta) -> Result<usize> {
        let repo = self.repository.as_ref();
        let mut calls = 0;

        match delta {
            NetDelta::Follow(follow) => {
                for (user, update) in follow.updates() {
                    match update {
                        UserStatUpdate::Follower(delta) => {
                            self.gateway
                                .run("increment_follower_count", || {
                                    repo.increment_follower_count(user, delta)
                                })
                                .await?;
                        }
                        UserStatUpdate::Following(delta) => {
                            self.gateway
                                .run("increment_following_count", || {
                                    repo.increment_following_count(user, delta)
                                })
                                .await?;
                        }
                        UserStatUpdate::Both {
                            follower,
                            following,
                        } => {
                            self.gateway
                                .run("increment_both", || {
                                    repo.increment_both(user, follower, following)
                                })
                                .await?;
                        }
                    }
                    calls += 1;
                }
            }
            NetDelta::Likes(deltas) => {
                for (image, delta) in deltas {
                    self.gateway
                        .run("increment_like_count", || {
                            repo.increment_like_count(*image, *delta)
                        })
                        .await?;
                    calls += 1;
                }
            }
            NetDelta::Comments(deltas) => {
                for (image, delta) in deltas {
                    self.gateway
                        .run("increment_comment_count", || {
                            repo.increment_comment_count(*image, *delta)
                        })
                        .await?;
                    calls += 1;
                }
            }
            NetDelta::None => {}
        }

        counter!("counter_updates_total").increment(calls as u64);
        Ok(calls)
    }
}
