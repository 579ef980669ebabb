//! Notification fan-out tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use snapshare_core::PipelineError;
use snapshare_core::model::{NotifyEvent, UserId};
use snapshare_core::repository::{EventBusNotificationPublisher, NOTIFICATION_TOPIC};
use snapshare_runtime::NotificationFanout;
use snapshare_testing::fixtures::{commented, followed, liked, unfollowed, uploaded};
use snapshare_testing::{Fault, InMemoryDirectory, InMemoryEventBus, RecordingPublisher};
use std::sync::Arc;

fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_user(7, "maya")
        .with_user(1, "ada")
        .with_user(2, "bo")
        .with_follow(1, 7)
        .with_follow(2, 7)
        .with_image(100, 7)
}

fn fanout(directory: &InMemoryDirectory, publisher: &RecordingPublisher) -> NotificationFanout {
    NotificationFanout::new(
        Arc::new(directory.clone()),
        Arc::new(directory.clone()),
        Arc::new(directory.clone()),
        Arc::new(publisher.clone()),
    )
}

#[tokio::test]
async fn upload_reaches_each_follower_once() {
    let publisher = RecordingPublisher::new();
    let sent = fanout(&directory(), &publisher)
        .handle(&uploaded(100, 7))
        .await
        .unwrap();

    assert_eq!(sent, 2);
    assert_eq!(
        publisher.published(),
        vec![
            NotifyEvent::new(UserId(1), "maya just upload an image"),
            NotifyEvent::new(UserId(2), "maya just upload an image"),
        ]
    );
}

#[tokio::test]
async fn upload_without_followers_sends_nothing() {
    let publisher = RecordingPublisher::new();
    let sent = fanout(&directory(), &publisher)
        .handle(&uploaded(101, 1))
        .await
        .unwrap();

    assert_eq!(sent, 0);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn duplicate_followers_are_notified_once() {
    let directory = directory().with_follow(1, 7);
    let publisher = RecordingPublisher::new();

    fanout(&directory, &publisher)
        .handle(&uploaded(100, 7))
        .await
        .unwrap();
    assert_eq!(publisher.recipients(), vec![1, 2]);
}

#[tokio::test]
async fn follow_notifies_the_followed_user() {
    let publisher = RecordingPublisher::new();
    fanout(&directory(), &publisher)
        .handle(&followed(1, 1, 7))
        .await
        .unwrap();

    assert_eq!(
        publisher.published(),
        vec![NotifyEvent::new(UserId(7), "ada started following you")]
    );
}

#[tokio::test]
async fn like_and_comment_notify_the_owner() {
    let publisher = RecordingPublisher::new();
    let fanout = fanout(&directory(), &publisher);

    fanout.handle(&liked(1, 2, 100)).await.unwrap();
    fanout.handle(&commented(2, 1, 100, "love the light")).await.unwrap();

    assert_eq!(
        publisher.published(),
        vec![
            NotifyEvent::new(UserId(7), "bo liked your image"),
            NotifyEvent::new(UserId(7), "ada commented on your image: love the light"),
        ]
    );
}

#[tokio::test]
async fn actors_are_not_notified_about_themselves() {
    let publisher = RecordingPublisher::new();
    let fanout = fanout(&directory(), &publisher);

    assert_eq!(fanout.handle(&liked(1, 7, 100)).await.unwrap(), 0);
    assert_eq!(fanout.handle(&followed(2, 7, 7)).await.unwrap(), 0);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn retractions_notify_nobody() {
    let publisher = RecordingPublisher::new();
    let sent = fanout(&directory(), &publisher)
        .handle(&unfollowed(1, 1, 7))
        .await
        .unwrap();

    assert_eq!(sent, 0);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn missing_actor_sends_nothing() {
    let publisher = RecordingPublisher::new();
    let result = fanout(&directory(), &publisher)
        .handle(&uploaded(100, 42))
        .await;

    assert!(matches!(result, Err(PipelineError::NotFound { entity: "user", id: 42 })));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn missing_image_sends_nothing() {
    let publisher = RecordingPublisher::new();
    let result = fanout(&directory(), &publisher)
        .handle(&liked(1, 1, 999))
        .await;

    assert!(matches!(result, Err(PipelineError::NotFound { entity: "image", id: 999 })));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn lookup_failure_is_returned_unchanged() {
    let directory = directory();
    directory.fail_next(1, Fault::ConnectionReset);
    let publisher = RecordingPublisher::new();

    let result = fanout(&directory, &publisher).handle(&uploaded(100, 7)).await;
    assert!(matches!(result, Err(PipelineError::Transient(_))));
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn every_recipient_is_attempted_before_reporting_failure() {
    let publisher = RecordingPublisher::new();
    publisher.fail_for(1);

    let result = fanout(&directory(), &publisher)
        .handle(&uploaded(100, 7))
        .await;

    match result {
        Err(PipelineError::Publish { failed, total, .. }) => {
            assert_eq!((failed, total), (1, 2));
        }
        other => panic!("expected a publish failure, got {other:?}"),
    }
    assert_eq!(publisher.recipients(), vec![2]);
}

#[tokio::test]
async fn bus_publisher_writes_json_keyed_by_recipient() {
    let bus = InMemoryEventBus::new();
    let publisher = EventBusNotificationPublisher::new(Arc::new(bus.clone()));
    let fanout = NotificationFanout::new(
        Arc::new(directory()),
        Arc::new(directory()),
        Arc::new(directory()),
        Arc::new(publisher),
    );

    fanout.handle(&followed(1, 2, 7)).await.unwrap();

    let messages = bus.messages(NOTIFICATION_TOPIC);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].key.as_deref(), Some(b"7".as_slice()));

    let payload: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
    assert_eq!(
        payload,
        serde_json::json!({ "userID": 7, "message": "bo started following you" })
    );
}
