//! Test infrastructure for the crashlane delivery pipeline.
//!
//! Provides event fixture builders, a scripted API client that records what
//! it was asked to upload, and an operation host that records what it was
//! notified about, plus a log capture for side effects that leave no
//! other trace. Together they let tests observe every side effect an
//! upload operation may perform.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::path::Path;

use crashlane_delivery::Configuration;

pub mod api;
pub mod fixtures;
pub mod host;
pub mod logs;

pub use api::{Reply, ScriptedApiClient};
pub use fixtures::{read_payload, EventBuilder};
pub use host::RecordingHost;
pub use logs::{LogCapture, SOURCE_DELETED};

/// API key used by [`test_configuration`].
pub const TEST_API_KEY: &str = "test-api-key";

/// Endpoint used by [`test_configuration`]. Never contacted.
pub const TEST_ENDPOINT: &str = "https://collector.test/notify";

/// Permissive configuration that stores retries in `retry_directory`.
///
/// # Panics
///
/// Panics if `retry_directory` is empty.
pub fn test_configuration(retry_directory: impl AsRef<Path>) -> Configuration {
    Configuration::builder(TEST_API_KEY, TEST_ENDPOINT, retry_directory.as_ref())
        .build()
        .expect("test configuration must be valid")
}
