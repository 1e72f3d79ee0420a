//! Build event reporting.
//!
//! The packer and the orchestrator report through an injected
//! [`BuildObserver`] rather than a global sink, so a test can record exactly
//! what a build did.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Key/value attributes attached to a span or event.
pub type Attributes<'a> = &'a [(&'a str, String)];

/// How a span ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

pub trait BuildObserver: Send + Sync {
    fn span_started(&self, name: &str, attributes: Attributes<'_>);

    fn span_finished(&self, name: &str, outcome: &SpanOutcome, elapsed: Duration);

    fn event(&self, name: &str, attributes: Attributes<'_>);
}

/// Run `f` inside a span named `name`.
pub fn observe<T>(
    observer: &dyn BuildObserver,
    name: &str,
    attributes: Attributes<'_>,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    observer.span_started(name, attributes);
    let started = Instant::now();
    let result = f();
    let outcome = match &result {
        Ok(_) => SpanOutcome::Succeeded,
        Err(err) => SpanOutcome::Failed(format!("{err:#}")),
    };
    observer.span_finished(name, &outcome, started.elapsed());
    result
}

fn render(attributes: Attributes<'_>) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn span_started(&self, name: &str, attributes: Attributes<'_>) {
        debug!(step = name, attributes = %render(attributes), "started");
    }

    fn span_finished(&self, name: &str, outcome: &SpanOutcome, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            SpanOutcome::Succeeded => info!(step = name, elapsed_ms, "finished"),
            SpanOutcome::Skipped => info!(step = name, "skipped"),
            SpanOutcome::Failed(reason) => warn!(step = name, elapsed_ms, %reason, "failed"),
        }
    }

    fn event(&self, name: &str, attributes: Attributes<'_>) {
        info!(name, attributes = %render(attributes), "event");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BuildObserver for NullObserver {
    fn span_started(&self, _name: &str, _attributes: Attributes<'_>) {}

    fn span_finished(&self, _name: &str, _outcome: &SpanOutcome, _elapsed: Duration) {}

    fn event(&self, _name: &str, _attributes: Attributes<'_>) {}
}

/// What a [`RecordingObserver`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Started {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Finished {
        name: String,
        outcome: SpanOutcome,
    },
    Event {
        name: String,
        attributes: Vec<(String, String)>,
    },
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

fn owned(attributes: Attributes<'_>) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Names of plain events, in emission order.
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Event { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Outcome of the last span called `name`.
    pub fn outcome_of(&self, name: &str) -> Option<SpanOutcome> {
        self.events.lock().iter().rev().find_map(|e| match e {
            ObservedEvent::Finished { name: n, outcome } if n == name => Some(outcome.clone()),
            _ => None,
        })
    }
}

impl BuildObserver for RecordingObserver {
    fn span_started(&self, name: &str, attributes: Attributes<'_>) {
        self.events.lock().push(ObservedEvent::Started {
            name: name.to_string(),
            attributes: owned(attributes),
        });
    }

    fn span_finished(&self, name: &str, outcome: &SpanOutcome, _elapsed: Duration) {
        self.events.lock().push(ObservedEvent::Finished {
            name: name.to_string(),
            outcome: outcome.clone(),
        });
    }

    fn event(&self, name: &str, attributes: Attributes<'_>) {
        self.events.lock().push(ObservedEvent::Event {
            name: name.to_string(),
            attributes: owned(attributes),
        });
    }
}
