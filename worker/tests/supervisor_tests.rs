//! The full subscription table running over in-memory doubles.

#![allow(clippy::unwrap_used)]

use snapshare_core::batch::BatchConfig;
use snapshare_core::event::EventKind;
use snapshare_core::repository::EventBusNotificationPublisher;
use snapshare_runtime::{
    ConsumerGroupRunner, CounterSink, Pipeline, RetryGateway, RetryPolicy, RunnerConfig,
};
use snapshare_testing::fixtures::{followed, liked, uploaded};
use snapshare_testing::{Fault, InMemoryCounterRepository, InMemoryDirectory, InMemoryEventBus};
use snapshare_worker::{Capabilities, Config, Supervisor, subscription_table};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

struct World {
    bus: InMemoryEventBus,
    counters: InMemoryCounterRepository,
    supervisor: Supervisor,
}

fn start(policy: RetryPolicy, grace: Duration) -> World {
    let bus = InMemoryEventBus::new();
    let counters = InMemoryCounterRepository::new();
    let directory = Arc::new(
        InMemoryDirectory::new()
            .with_user(1, "alice")
            .with_user(2, "bob")
            .with_user(7, "carol")
            .with_image(100, 7)
            .with_follow(1, 7)
            .with_follow(2, 7),
    );
    let capabilities = Capabilities {
        counters: Arc::new(counters.clone()),
        users: directory.clone(),
        images: directory.clone(),
        follows: directory,
        publisher: Arc::new(EventBusNotificationPublisher::new(Arc::new(bus.clone()))),
    };

    let config = Config::from_lookup(|_| None);
    let mut supervisor = Supervisor::new(grace);
    let gateway = RetryGateway::new(policy, supervisor.abort_token());
    for (runner, pipeline) in subscription_table(&config, &capabilities, gateway).unwrap() {
        supervisor.spawn(ConsumerGroupRunner::new(
            runner,
            Arc::new(bus.clone()),
            pipeline,
            supervisor.shutdown_token(),
        ));
    }

    World {
        bus,
        counters,
        supervisor,
    }
}

#[tokio::test(start_paused = true)]
async fn events_are_counted_and_notified() {
    let world = start(RetryPolicy::default(), Duration::from_secs(30));
    assert_eq!(world.supervisor.len(), 7);

    world.bus.push_event(&followed(1, 1, 7));
    world.bus.push_event(&liked(2, 2, 100));
    let last_like = world.bus.push_event(&liked(3, 1, 100));
    world.bus.push_event(&uploaded(100, 7));

    let reports = world.supervisor.run_until(sleep(Duration::from_secs(30))).await;

    assert_eq!(reports.len(), 7);
    assert_eq!(world.counters.follower_count(7), 1);
    assert_eq!(world.counters.following_count(1), 1);
    assert_eq!(world.counters.like_count(100), 2);

    let mut recipients: Vec<i64> = world
        .bus
        .notifications("notification.created")
        .iter()
        .map(|n| n.user_id.get())
        .collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec![1, 2, 7, 7, 7]);

    assert_eq!(world.bus.committed_offset("image.liked", "group-2"), Some(last_like + 1));
    assert_eq!(world.bus.committed_offset("image.liked", "group-1"), Some(last_like + 1));
    let batches: u64 = reports.iter().map(|r| r.batches_flushed).sum();
    assert_eq!(batches, 2);
}

#[tokio::test(start_paused = true)]
async fn grace_period_interrupts_retry_backoff() {
    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .initial_delay(Duration::from_secs(60))
        .max_delay(Duration::from_secs(120))
        .build();
    let world = start(policy, Duration::from_secs(5));
    world.counters.fail_next(100, Fault::ConnectionReset);

    world.bus.push_event(&liked(1, 2, 100));

    let started = Instant::now();
    let reports = world.supervisor.run_until(sleep(Duration::from_secs(2))).await;

    assert_eq!(reports.len(), 7);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(world.counters.attempts(), 1);
    assert_eq!(world.counters.like_count(100), 0);
    assert_eq!(world.bus.committed_offset("image.liked", "group-2"), None);
}

#[tokio::test(start_paused = true)]
async fn grace_period_bounds_a_database_call_that_never_returns() {
    let grace = Duration::from_secs(5);
    let world = start(RetryPolicy::default(), grace);
    world.counters.stall();

    world.bus.push_event(&liked(1, 2, 100));

    let started = Instant::now();
    let reports = tokio::time::timeout(
        Duration::from_secs(3600),
        world.supervisor.run_until(sleep(Duration::from_secs(2))),
    )
    .await
    .unwrap();

    assert_eq!(reports.len(), 7);
    assert!(started.elapsed() <= Duration::from_secs(2) + grace + Duration::from_secs(1));
    assert_eq!(world.counters.attempts(), 1);
    assert_eq!(world.counters.like_count(100), 0);
    assert_eq!(world.bus.committed_offset("image.liked", "group-2"), None);
    // The notify group was not blocked by the stalled database.
    assert_eq!(world.bus.committed_offset("image.liked", "group-1"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn runner_ignoring_the_abort_token_is_aborted() {
    let bus = InMemoryEventBus::new();
    let counters = InMemoryCounterRepository::new();
    counters.stall();

    let grace = Duration::from_secs(5);
    let mut supervisor = Supervisor::new(grace).with_abort_deadline(Duration::from_secs(3));
    // Its own abort token, which the supervisor never cancels.
    let gateway = RetryGateway::new(RetryPolicy::default(), CancellationToken::new());
    let sink = Arc::new(CounterSink::new(Arc::new(counters.clone()), gateway));
    supervisor.spawn(ConsumerGroupRunner::new(
        RunnerConfig::new(EventKind::ImageLiked, "group-2"),
        Arc::new(bus.clone()),
        Pipeline::Count {
            sink,
            batch: BatchConfig::likes(),
        },
        supervisor.shutdown_token(),
    ));
    bus.push_event(&liked(1, 2, 100));

    let started = Instant::now();
    let reports = tokio::time::timeout(
        Duration::from_secs(3600),
        supervisor.run_until(sleep(Duration::from_secs(2))),
    )
    .await
    .unwrap();

    assert!(reports.is_empty());
    assert!(started.elapsed() <= Duration::from_secs(2 + 5 + 3 + 1));
    assert_eq!(counters.attempts(), 1);
    assert_eq!(bus.committed_offset("image.liked", "group-2"), None);
}
