//! Capture of `tracing` events for assertions on log output.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One recorded log event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Event level
    pub level: Level,
    /// Event target (module path)
    pub target: String,
    /// The `message` field
    pub message: String,
    /// Every other field, formatted with `Debug`
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of `name`, if the event carries that field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A [`Layer`] that records every event it sees.
///
/// # Example
///
/// ```
/// use snapshare_testing::LogCapture;
/// use tracing::Level;
///
/// let logs = LogCapture::new();
/// let _guard = logs.install();
///
/// tracing::warn!(attempt = 1, "Transient failure, retrying");
/// assert_eq!(logs.count(Level::WARN, "retrying"), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Create an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make this capture the thread's default subscriber until the guard drops.
    ///
    /// Works with `#[tokio::test]`, whose runtime runs every task on the test
    /// thread.
    #[must_use]
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events at `level` whose message contains `needle`.
    #[must_use]
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == level && event.message.contains(needle))
            .cloned()
            .collect()
    }

    /// Number of events at `level` whose message contains `needle`.
    #[must_use]
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.matching(level, needle).len()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }
}
