//! Notifier identity attached to every outbound request.

use serde::{Deserialize, Serialize};

/// Describes the library that produced an event.
///
/// Operations only read it; it is serialized verbatim into each envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifier {
    /// Notifier name
    pub name: String,
    /// Notifier version
    pub version: String,
    /// Project homepage
    pub url: String,
    /// Wrapped notifiers, e.g. a framework integration around this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Notifier>,
}

impl Notifier {
    /// Creates a notifier description without dependencies.
    pub fn new(name: impl Into<String>, version: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), url: url.into(), dependencies: Vec::new() }
    }

    /// Adds a wrapped notifier.
    #[must_use]
    pub fn with_dependency(mut self, dependency: Notifier) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new("crashlane", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_REPOSITORY"))
    }
}
