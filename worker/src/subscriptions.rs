//! The worker's subscription table.
//!
//! | Topic | Group | Pipeline |
//! |---|---|---|
//! | `user.followed` | `group-1` | notification fan-out |
//! | `user.followed` | `group-2` | follower/following counters |
//! | `image.liked` | `group-1` | notification fan-out |
//! | `image.liked` | `group-2` | like counters |
//! | `image.commented` | `group-1` | notification fan-out |
//! | `image.commented` | `group-2` | comment counters |
//! | `image.uploaded` | `group-1` | notification fan-out |

use crate::config::Config;
use snapshare_core::PipelineError;
use snapshare_core::event::EventKind;
use snapshare_core::repository::{
    CounterRepository, FollowRepository, ImageRepository, NotificationPublisher, UserRepository,
};
use snapshare_runtime::{CounterSink, NotificationFanout, Pipeline, RetryGateway, RunnerConfig};
use std::sync::Arc;

/// Consumer group of the notification runners.
pub const NOTIFY_GROUP: &str = "group-1";

/// Consumer group of the counter runners.
pub const COUNT_GROUP: &str = "group-2";

/// Everything the runners call out to.
#[derive(Clone)]
pub struct Capabilities {
    /// Counter increments
    pub counters: Arc<dyn CounterRepository>,
    /// User lookups
    pub users: Arc<dyn UserRepository>,
    /// Image lookups
    pub images: Arc<dyn ImageRepository>,
    /// Follower lookups
    pub follows: Arc<dyn FollowRepository>,
    /// Outbound notifications
    pub publisher: Arc<dyn NotificationPublisher>,
}

/// Build one `(RunnerConfig, Pipeline)` per row of the subscription table.
///
/// All counter runners share one [`CounterSink`] and all notification runners
/// share one [`NotificationFanout`].
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] if a configured batch threshold is zero.
pub fn subscription_table(
    config: &Config,
    capabilities: &Capabilities,
    gateway: RetryGateway,
) -> Result<Vec<(RunnerConfig, Pipeline)>, PipelineError> {
    let fanout = Arc::new(NotificationFanout::new(
        Arc::clone(&capabilities.users),
        Arc::clone(&capabilities.images),
        Arc::clone(&capabilities.follows),
        Arc::clone(&capabilities.publisher),
    ));
    let sink = Arc::new(CounterSink::new(Arc::clone(&capabilities.counters), gateway));

    let runner = |kind: EventKind, group: &str| {
        RunnerConfig::new(kind, group)
            .with_max_poll_records(config.pipeline.max_poll_records)
            .with_fetch_timeout(config.pipeline.fetch_timeout())
            .with_resubscribe_delay(config.pipeline.resubscribe_delay())
    };

    let mut table = Vec::with_capacity(7);
    for kind in EventKind::ALL {
        table.push((runner(kind, NOTIFY_GROUP), Pipeline::Notify(Arc::clone(&fanout))));

        if let Some(setting) = config.batches.for_kind(kind) {
            table.push((
                runner(kind, COUNT_GROUP),
                Pipeline::Count {
                    sink: Arc::clone(&sink),
                    batch: setting.to_batch_config()?,
                },
            ));
        }
    }
    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use snapshare_runtime::RetryPolicy;
    use snapshare_testing::{InMemoryCounterRepository, InMemoryDirectory, RecordingPublisher};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn capabilities() -> Capabilities {
        let directory = Arc::new(InMemoryDirectory::new());
        Capabilities {
            counters: Arc::new(InMemoryCounterRepository::new()),
            users: directory.clone(),
            images: directory.clone(),
            follows: directory,
            publisher: Arc::new(RecordingPublisher::new()),
        }
    }

    fn gateway() -> RetryGateway {
        RetryGateway::new(RetryPolicy::default(), CancellationToken::new())
    }

    #[test]
    fn default_table_has_seven_runners() {
        let config = Config::from_lookup(|_| None);
        let table = subscription_table(&config, &capabilities(), gateway()).unwrap();

        let rows: Vec<(&str, &str, Option<(usize, Duration)>)> = table
            .iter()
            .map(|(runner, pipeline)| {
                let batch = match pipeline {
                    Pipeline::Notify(_) => None,
                    Pipeline::Count { batch, .. } => Some((batch.max_size, batch.window)),
                };
                (runner.topic(), runner.group.as_str(), batch)
            })
            .collect();

        assert_eq!(
            rows,
            vec![
                ("user.followed", "group-1", None),
                ("user.followed", "group-2", Some((10, Duration::from_secs(10)))),
                ("image.liked", "group-1", None),
                ("image.liked", "group-2", Some((10, Duration::from_secs(10)))),
                ("image.commented", "group-1", None),
                ("image.commented", "group-2", Some((10, Duration::from_secs(18)))),
                ("image.uploaded", "group-1", None),
            ]
        );
    }

    #[test]
    fn polling_settings_reach_every_runner() {
        let config = Config::from_lookup(|key| match key {
            "MAX_POLL_RECORDS" => Some("25".to_string()),
            "RESUBSCRIBE_DELAY_SECS" => Some("1".to_string()),
            _ => None,
        });
        let table = subscription_table(&config, &capabilities(), gateway()).unwrap();

        assert!(table.iter().all(|(runner, _)| runner.max_poll_records == 25
            && runner.resubscribe_delay == Duration::from_secs(1)));
    }

    #[test]
    fn invalid_batch_settings_are_rejected() {
        let config = Config::from_lookup(|key| (key == "FOLLOW_BATCH_WINDOW_SECS").then(|| "0".to_string()));

        assert!(matches!(
            subscription_table(&config, &capabilities(), gateway()),
            Err(PipelineError::Validation(_))
        ));
    }
}
