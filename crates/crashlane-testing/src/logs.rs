//! Log capture for side effects that leave nothing else to observe.
//!
//! Deleting an in-memory event, or deleting a file twice, changes nothing on
//! disk. The delivery crate logs every source deletion, so counting log
//! messages is how tests assert a deletion happened exactly once.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{
    field::{Field, Visit},
    subscriber::DefaultGuard,
    Event, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    Layer,
};

/// Message logged once per successful event source deletion.
pub const SOURCE_DELETED: &str = "event source deleted";

/// Records the message of every log event on the current thread.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    /// Installs a capturing subscriber as the current thread's default.
    ///
    /// Capture stops when the guard is dropped. Work spawned onto other
    /// threads is not captured, so operations must be awaited directly.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// All captured messages in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of captured events whose message is exactly `message`.
    pub fn count(&self, message: &str) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|captured| captured.as_str() == message)
            .count()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}
