//! In-memory repositories and publisher with call recording and fault injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future::BoxFuture;
use snapshare_core::error::{PipelineError, Result};
use snapshare_core::model::{Image, ImageId, NotifyEvent, User, UserId, UserStat};
use snapshare_core::repository::{
    CounterRepository, FollowRepository, ImageRepository, NotificationPublisher, UserRepository,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Failures that can be injected into the in-memory doubles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Transient: the connection was reset
    ConnectionReset,
    /// Terminal: the write was rejected
    Validation,
    /// The call was cancelled
    Cancelled,
}

impl Fault {
    /// The error this fault produces.
    #[must_use]
    pub fn to_error(self) -> PipelineError {
        match self {
            Self::ConnectionReset => PipelineError::Transient("connection reset by peer".to_string()),
            Self::Validation => PipelineError::Validation("value out of range".to_string()),
            Self::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// A successful counter call, as recorded by [`InMemoryCounterRepository`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CounterCall {
    /// `increment_follower_count`
    Follower(UserId, i64),
    /// `increment_following_count`
    Following(UserId, i64),
    /// `increment_both`
    Both(UserId, i64, i64),
    /// `increment_like_count`
    Like(ImageId, i64),
    /// `increment_comment_count`
    Comment(ImageId, i64),
}

#[derive(Debug, Default)]
struct CounterState {
    user_stats: BTreeMap<UserId, UserStat>,
    likes: BTreeMap<ImageId, i64>,
    comments: BTreeMap<ImageId, i64>,
    calls: Vec<CounterCall>,
    attempts: usize,
    faults: VecDeque<Fault>,
    stalled: bool,
}

/// In-memory [`CounterRepository`].
///
/// Every call counts as an attempt. Queued faults are returned first, one per
/// attempt; only successful calls are recorded and applied. A stalled
/// repository never completes a call.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCounterRepository {
    state: Arc<Mutex<CounterState>>,
}

impl InMemoryCounterRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with `fault`.
    pub fn fail_next(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock().unwrap();
        state.faults.extend(std::iter::repeat_n(fault, n));
    }

    /// Make every later call hang forever, like a database that stopped
    /// answering.
    pub fn stall(&self) {
        self.state.lock().unwrap().stalled = true;
    }

    /// Successful calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CounterCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls made, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Current follower count of `user`.
    #[must_use]
    pub fn follower_count(&self, user: i64) -> i64 {
        self.stat(user).follower_count
    }

    /// Current following count of `user`.
    #[must_use]
    pub fn following_count(&self, user: i64) -> i64 {
        self.stat(user).following_count
    }

    /// Current like count of `image`.
    #[must_use]
    pub fn like_count(&self, image: i64) -> i64 {
        let state = self.state.lock().unwrap();
        state.likes.get(&ImageId(image)).copied().unwrap_or(0)
    }

    /// Current comment count of `image`.
    #[must_use]
    pub fn comment_count(&self, image: i64) -> i64 {
        let state = self.state.lock().unwrap();
        state.comments.get(&ImageId(image)).copied().unwrap_or(0)
    }

    fn stat(&self, user: i64) -> UserStat {
        let state = self.state.lock().unwrap();
        state
            .user_stats
            .get(&UserId(user))
            .cloned()
            .unwrap_or_default()
    }

    async fn call(&self, call: CounterCall) -> Result<()> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            if state.stalled {
                state.attempts += 1;
            }
            state.stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.apply(call)
    }

    fn apply(&self, call: CounterCall) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some(fault) = state.faults.pop_front() {
            return Err(fault.to_error());
        }

        match &call {
            CounterCall::Follower(user, delta) => {
                stat_entry(&mut state.user_stats, *user).follower_count += delta;
            }
            CounterCall::Following(user, delta) => {
                stat_entry(&mut state.user_stats, *user).following_count += delta;
            }
            CounterCall::Both(user, follower, following) => {
                let stat = stat_entry(&mut state.user_stats, *user);
                stat.follower_count += follower;
                stat.following_count += following;
            }
            CounterCall::Like(image, delta) => *state.likes.entry(*image).or_insert(0) += delta,
            CounterCall::Comment(image, delta) => {
                *state.comments.entry(*image).or_insert(0) += delta;
            }
        }
        state.calls.push(call);
        Ok(())
    }
}

fn stat_entry(stats: &mut BTreeMap<UserId, UserStat>, user: UserId) -> &mut UserStat {
    stats.entry(user).or_insert_with(|| UserStat {
        user_id: user,
        ..UserStat::default()
    })
}

impl CounterRepository for InMemoryCounterRepository {
    fn increment_follower_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.call(CounterCall::Follower(user, delta)))
    }

    fn increment_following_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.call(CounterCall::Following(user, delta)))
    }

    fn increment_both(
        &self,
        user: UserId,
        follower_delta: i64,
        following_delta: i64,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.call(CounterCall::Both(user, follower_delta, following_delta)))
    }

    fn increment_like_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.call(CounterCall::Like(image, delta)))
    }

    fn increment_comment_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.call(CounterCall::Comment(image, delta)))
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<UserId, User>,
    images: HashMap<ImageId, Image>,
    /// (follower, following)
    follows: Vec<(UserId, UserId)>,
    faults: VecDeque<Fault>,
}

/// In-memory users, images and follow graph.
///
/// # Example
///
/// ```
/// use snapshare_testing::InMemoryDirectory;
///
/// let directory = InMemoryDirectory::new()
///     .with_user(7, "maya")
///     .with_user(1, "ada")
///     .with_follow(1, 7)
///     .with_image(100, 7);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user.
    #[must_use]
    pub fn with_user(self, id: i64, username: &str) -> Self {
        self.state.write().unwrap().users.insert(
            UserId(id),
            User {
                id: UserId(id),
                username: username.to_string(),
            },
        );
        self
    }

    /// Add an image owned by `owner`.
    #[must_use]
    pub fn with_image(self, id: i64, owner: i64) -> Self {
        self.state.write().unwrap().images.insert(
            ImageId(id),
            Image {
                id: ImageId(id),
                user_id: UserId(owner),
                like_count: 0,
                comment_count: 0,
            },
        );
        self
    }

    /// Record that `follower` follows `following`.
    #[must_use]
    pub fn with_follow(self, follower: i64, following: i64) -> Self {
        self.state
            .write()
            .unwrap()
            .follows
            .push((UserId(follower), UserId(following)));
        self
    }

    /// Fail the next `n` lookups with `fault`.
    pub fn fail_next(&self, n: usize, fault: Fault) {
        let mut state = self.state.write().unwrap();
        state.faults.extend(std::iter::repeat_n(fault, n));
    }

    fn injected_fault(&self) -> Result<()> {
        match self.state.write().unwrap().faults.pop_front() {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }
}

impl UserRepository for InMemoryDirectory {
    fn find_by_id(&self, id: UserId) -> BoxFuture<'_, Result<User>> {
        Box::pin(async move {
            self.injected_fault()?;
            self.state
                .read()
                .unwrap()
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| PipelineError::not_found("user", id.get()))
        })
    }
}

impl ImageRepository for InMemoryDirectory {
    fn find_by_id(&self, id: ImageId) -> BoxFuture<'_, Result<Image>> {
        Box::pin(async move {
            self.injected_fault()?;
            self.state
                .read()
                .unwrap()
                .images
                .get(&id)
                .cloned()
                .ok_or_else(|| PipelineError::not_found("image", id.get()))
        })
    }
}

impl FollowRepository for InMemoryDirectory {
    fn followers_of(&self, user: UserId) -> BoxFuture<'_, Result<Vec<UserId>>> {
        Box::pin(async move {
            self.injected_fault()?;
            Ok(self
                .state
                .read()
                .unwrap()
                .follows
                .iter()
                .filter(|(_, following)| *following == user)
                .map(|(follower, _)| *follower)
                .collect())
        })
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    published: Vec<NotifyEvent>,
    failing_recipients: HashSet<UserId>,
}

/// [`NotificationPublisher`] that records what it publishes.
#[derive(Clone, Debug, Default)]
pub struct RecordingPublisher {
    state: Arc<Mutex<PublisherState>>,
}

impl RecordingPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish addressed to `user`.
    pub fn fail_for(&self, user: i64) {
        self.state
            .lock()
            .unwrap()
            .failing_recipients
            .insert(UserId(user));
    }

    /// Notifications published so far.
    #[must_use]
    pub fn published(&self) -> Vec<NotifyEvent> {
        self.state.lock().unwrap().published.clone()
    }

    /// Recipients of published notifications, sorted.
    #[must_use]
    pub fn recipients(&self) -> Vec<i64> {
        let mut recipients: Vec<i64> = self
            .published()
            .iter()
            .map(|event| event.user_id.get())
            .collect();
        recipients.sort_unstable();
        recipients
    }
}

impl NotificationPublisher for RecordingPublisher {
    fn publish(&self, event: NotifyEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.failing_recipients.contains(&event.user_id) {
                return Err(PipelineError::Transient(format!(
                    "broker unavailable for {}",
                    event.user_id
                )));
            }
            state.published.push(event);
            Ok(())
        })
    }
}
