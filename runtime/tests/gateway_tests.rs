//! Retry gateway and counter sink tests against the in-memory repository.

#![allow(clippy::unwrap_used)]

use snapshare_core::PipelineError;
use snapshare_core::aggregate::{FollowDelta, NetDelta};
use snapshare_core::model::{ImageId, UserId};
use snapshare_core::repository::CounterRepository;
use snapshare_runtime::{CounterSink, RetryGateway, RetryPolicy};
use snapshare_testing::{CounterCall, Fault, InMemoryCounterRepository, LogCapture};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

fn gateway() -> RetryGateway {
    RetryGateway::new(RetryPolicy::default(), CancellationToken::new())
}

#[tokio::test(start_paused = true)]
async fn two_connection_resets_then_success() {
    let logs = LogCapture::new();
    let _guard = logs.install();
    let repo = InMemoryCounterRepository::new();
    repo.fail_next(2, Fault::ConnectionReset);

    let result = gateway()
        .run("increment_like_count", || repo.increment_like_count(ImageId(100), 1))
        .await;

    assert!(result.is_ok());
    assert_eq!(repo.attempts(), 3);
    assert_eq!(repo.like_count(100), 1);

    let retries = logs.matching(Level::WARN, "retrying");
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].field("attempt"), Some("1"));
    assert_eq!(retries[1].field("attempt"), Some("2"));
    assert_eq!(retries[0].field("max_attempts"), Some("3"));
    assert_eq!(retries[0].field("delay_ms"), Some("500"));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_surfaces_the_last_error() {
    let logs = LogCapture::new();
    let _guard = logs.install();
    let repo = InMemoryCounterRepository::new();
    repo.fail_next(5, Fault::ConnectionReset);

    let result = gateway()
        .run("increment_follower_count", || {
            repo.increment_follower_count(UserId(1), 1)
        })
        .await;

    assert!(matches!(result, Err(PipelineError::Transient(_))));
    assert_eq!(repo.attempts(), 3);
    assert_eq!(logs.count(Level::WARN, "retrying"), 2);
    assert_eq!(logs.count(Level::ERROR, "Operation failed after max attempts"), 1);
}

#[tokio::test(start_paused = true)]
async fn validation_errors_are_not_retried() {
    let logs = LogCapture::new();
    let _guard = logs.install();
    let repo = InMemoryCounterRepository::new();
    repo.fail_next(1, Fault::Validation);

    let result = gateway()
        .run("increment_like_count", || repo.increment_like_count(ImageId(1), 1))
        .await;

    assert!(matches!(result, Err(PipelineError::Validation(_))));
    assert_eq!(repo.attempts(), 1);
    assert_eq!(logs.count(Level::WARN, "retrying"), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_calls_are_not_retried() {
    let repo = InMemoryCounterRepository::new();
    repo.fail_next(1, Fault::Cancelled);

    let result = gateway()
        .run("increment_like_count", || repo.increment_like_count(ImageId(1), 1))
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(repo.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn sink_routes_follow_updates() {
    let repo = InMemoryCounterRepository::new();
    let sink = CounterSink::new(Arc::new(repo.clone()), gateway());

    // 1 follows 2 and 2 follows 3 in the same batch.
    let delta = NetDelta::Follow(FollowDelta {
        followers: BTreeMap::from([(UserId(2), 1), (UserId(3), 1)]),
        following: BTreeMap::from([(UserId(1), 1), (UserId(2), 1)]),
    });
    let calls = sink.apply(&delta).await.unwrap();

    assert_eq!(calls, 3);
    assert_eq!(
        repo.calls(),
        vec![
            CounterCall::Following(UserId(1), 1),
            CounterCall::Both(UserId(2), 1, 1),
            CounterCall::Follower(UserId(3), 1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn sink_issues_no_calls_for_an_empty_delta() {
    let repo = InMemoryCounterRepository::new();
    let sink = CounterSink::new(Arc::new(repo.clone()), gateway());

    assert_eq!(sink.apply(&NetDelta::Likes(BTreeMap::new())).await.unwrap(), 0);
    assert_eq!(sink.apply(&NetDelta::Follow(FollowDelta::default())).await.unwrap(), 0);
    assert_eq!(sink.apply(&NetDelta::None).await.unwrap(), 0);
    assert_eq!(repo.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn sink_stops_at_the_first_terminal_failure() {
    let repo = InMemoryCounterRepository::new();
    repo.fail_next(1, Fault::Validation);
    let sink = CounterSink::new(Arc::new(repo.clone()), gateway());

    let delta = NetDelta::Comments(BTreeMap::from([(ImageId(1), 2), (ImageId(2), -1)]));
    let result = sink.apply(&delta).await;

    assert!(matches!(result, Err(PipelineError::Validation(_))));
    assert_eq!(repo.attempts(), 1);
    assert!(repo.calls().is_empty());
}
