//! Delivery configuration snapshot and the should-send policy.
//!
//! A [`Configuration`] is built once by the host and shared read-only by
//! every operation. Besides where to send and where to persist retries, it
//! carries the filters that decide whether an event is sent at all.

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crashlane_core::EventRecord;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Callback consulted right before an event is uploaded.
///
/// Returning `false` drops the event.
pub type OnSendCallback = Arc<dyn Fn(&EventRecord) -> bool + Send + Sync>;

/// Reason an event was filtered out before upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Ineligibility {
    /// Reporting is switched off entirely.
    ReportingDisabled,
    /// The event's release stage is not among the enabled stages.
    ReleaseStageDisabled {
        /// Release stage of the event, if it had one
        release_stage: Option<String>,
    },
    /// The event's error class is listed in the discard classes.
    DiscardedErrorClass {
        /// Matching error class
        error_class: String,
    },
    /// An on-send callback returned `false`.
    RejectedByCallback {
        /// Position of the rejecting callback
        index: usize,
    },
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReportingDisabled => write!(f, "reporting disabled"),
            Self::ReleaseStageDisabled { release_stage: Some(stage) } => {
                write!(f, "release stage {stage:?} not enabled")
            },
            Self::ReleaseStageDisabled { release_stage: None } => {
                write!(f, "event has no release stage and stages are restricted")
            },
            Self::DiscardedErrorClass { error_class } => {
                write!(f, "error class {error_class:?} is discarded")
            },
            Self::RejectedByCallback { index } => write!(f, "on-send callback {index} rejected event"),
        }
    }
}

/// Read-only delivery configuration shared by all operations.
#[derive(Clone)]
pub struct Configuration {
    api_key: String,
    endpoint: String,
    retry_directory: PathBuf,
    release_stage: Option<String>,
    enabled_release_stages: Option<BTreeSet<String>>,
    discard_classes: BTreeSet<String>,
    send_reports: bool,
    on_send: Vec<OnSendCallback>,
}

impl Configuration {
    /// Starts building a configuration from its required parts.
    pub fn builder(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        retry_directory: impl Into<PathBuf>,
    ) -> ConfigurationBuilder {
        ConfigurationBuilder {
            config: Self {
                api_key: api_key.into(),
                endpoint: endpoint.into(),
                retry_directory: retry_directory.into(),
                release_stage: None,
                enabled_release_stages: None,
                discard_classes: BTreeSet::new(),
                send_reports: true,
                on_send: Vec::new(),
            },
        }
    }

    /// Default API key for events that do not carry their own.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Collector URL events are uploaded to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Directory retryable payloads are persisted into.
    pub fn retry_directory(&self) -> &Path {
        &self.retry_directory
    }

    /// Release stage of the running application.
    pub fn release_stage(&self) -> Option<&str> {
        self.release_stage.as_deref()
    }

    /// Decides whether `event` may be sent right now.
    ///
    /// Rules are evaluated in order: reporting switch, enabled release stages,
    /// discard classes, then on-send callbacks. The first failing rule is
    /// returned. An ineligible event will not become eligible by waiting.
    ///
    /// # Errors
    ///
    /// Returns the [`Ineligibility`] of the first rule that rejects the event.
    pub fn should_send(&self, event: &EventRecord) -> std::result::Result<(), Ineligibility> {
        if !self.send_reports {
            return Err(Ineligibility::ReportingDisabled);
        }

        if let Some(enabled) = &self.enabled_release_stages {
            let release_stage = event.release_stage().or(self.release_stage.as_deref());
            if !release_stage.is_some_and(|stage| enabled.contains(stage)) {
                return Err(Ineligibility::ReleaseStageDisabled {
                    release_stage: release_stage.map(str::to_string),
                });
            }
        }

        if let Some(error_class) = event.error_class() {
            if self.discard_classes.contains(error_class) {
                return Err(Ineligibility::DiscardedErrorClass {
                    error_class: error_class.to_string(),
                });
            }
        }

        if let Some(index) = self.on_send.iter().position(|callback| !callback(event)) {
            return Err(Ineligibility::RejectedByCallback { index });
        }

        Ok(())
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("endpoint", &self.endpoint)
            .field("retry_directory", &self.retry_directory)
            .field("release_stage", &self.release_stage)
            .field("enabled_release_stages", &self.enabled_release_stages)
            .field("discard_classes", &self.discard_classes)
            .field("send_reports", &self.send_reports)
            .field("on_send", &self.on_send.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Configuration`].
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    /// Sets the release stage of the running application.
    #[must_use]
    pub fn release_stage(mut self, stage: impl Into<String>) -> Self {
        self.config.release_stage = Some(stage.into());
        self
    }

    /// Restricts delivery to events from the given release stages.
    #[must_use]
    pub fn enabled_release_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.enabled_release_stages = Some(stages.into_iter().map(Into::into).collect());
        self
    }

    /// Drops events whose first error has this class.
    #[must_use]
    pub fn discard_class(mut self, error_class: impl Into<String>) -> Self {
        self.config.discard_classes.insert(error_class.into());
        self
    }

    /// Switches delivery on or off as a whole.
    #[must_use]
    pub fn send_reports(mut self, enabled: bool) -> Self {
        self.config.send_reports = enabled;
        self
    }

    /// Registers a callback that can veto individual events.
    #[must_use]
    pub fn on_send<F>(mut self, callback: F) -> Self
    where
        F: Fn(&EventRecord) -> bool + Send + Sync + 'static,
    {
        self.config.on_send.push(Arc::new(callback));
        self
    }

    /// Finishes the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the API key, endpoint or retry
    /// directory is empty.
    pub fn build(self) -> Result<Configuration> {
        if self.config.api_key.trim().is_empty() {
            return Err(DeliveryError::configuration("api key must not be empty"));
        }
        if self.config.endpoint.trim().is_empty() {
            return Err(DeliveryError::configuration("endpoint must not be empty"));
        }
        if self.config.retry_directory.as_os_str().is_empty() {
            return Err(DeliveryError::configuration("retry directory must not be empty"));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use crashlane_core::{EventKey, EventOrigin, Payload};
    use serde_json::{json, Value};

    use super::*;

    fn event(value: Value) -> EventRecord {
        let Value::Object(payload) = value else { unreachable!("fixture must be an object") };
        EventRecord::new(EventKey::new("crash-1"), payload, EventOrigin::InMemory)
    }

    fn builder() -> ConfigurationBuilder {
        Configuration::builder("api-key", "https://notify.example.com", "/tmp/crashlane")
    }

    #[test]
    fn default_configuration_sends_everything() {
        let config = builder().build().unwrap();
        assert_eq!(config.should_send(&event(json!({}))), Ok(()));
    }

    #[test]
    fn reporting_switch_wins_over_other_rules() {
        let config = builder().send_reports(false).discard_class("SIGABRT").build().unwrap();
        let crash = event(json!({ "exceptions": [{ "errorClass": "SIGABRT" }] }));

        assert_eq!(config.should_send(&crash), Err(Ineligibility::ReportingDisabled));
    }

    #[test]
    fn release_stage_falls_back_to_configured_stage() {
        let config =
            builder().release_stage("development").enabled_release_stages(["production"]).build().unwrap();

        assert_eq!(
            config.should_send(&event(json!({}))),
            Err(Ineligibility::ReleaseStageDisabled { release_stage: Some("development".into()) })
        );
        assert_eq!(
            config.should_send(&event(json!({ "app": { "releaseStage": "production" } }))),
            Ok(())
        );
    }

    #[test]
    fn missing_release_stage_is_rejected_when_restricted() {
        let config = builder().enabled_release_stages(["production"]).build().unwrap();

        assert_eq!(
            config.should_send(&event(json!({}))),
            Err(Ineligibility::ReleaseStageDisabled { release_stage: None })
        );
    }

    #[test]
    fn discard_classes_match_first_error() {
        let config = builder().discard_class("NSInternalInconsistencyException").build().unwrap();

        let discarded = event(json!({
            "exceptions": [{ "errorClass": "NSInternalInconsistencyException" }]
        }));
        let kept = event(json!({
            "exceptions": [{ "errorClass": "SIGSEGV" }, { "errorClass": "NSInternalInconsistencyException" }]
        }));

        assert!(matches!(
            config.should_send(&discarded),
            Err(Ineligibility::DiscardedErrorClass { .. })
        ));
        assert_eq!(config.should_send(&kept), Ok(()));
    }

    #[test]
    fn callbacks_veto_in_registration_order() {
        let config = builder()
            .on_send(|_| true)
            .on_send(|event| event.payload().get("context") != Some(&json!("secret")))
            .build()
            .unwrap();

        assert_eq!(
            config.should_send(&event(json!({ "context": "secret" }))),
            Err(Ineligibility::RejectedByCallback { index: 1 })
        );
        assert_eq!(config.should_send(&EventRecord::new(
            EventKey::new("crash-2"),
            Payload::new(),
            EventOrigin::InMemory,
        )), Ok(()));
    }

    #[test]
    fn build_rejects_empty_required_fields() {
        assert!(Configuration::builder("", "https://x", "/tmp").build().is_err());
        assert!(Configuration::builder("key", " ", "/tmp").build().is_err());
        assert!(Configuration::builder("key", "https://x", "").build().is_err());
    }

    #[test]
    fn ineligibility_display() {
        assert_eq!(
            Ineligibility::DiscardedErrorClass { error_class: "SIGABRT".into() }.to_string(),
            "error class \"SIGABRT\" is discarded"
        );
    }
}
