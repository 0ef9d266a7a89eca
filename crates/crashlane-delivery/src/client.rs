//! API client contract and the reqwest-backed implementation.
//!
//! The operation hands the client a fully encoded request and gets back
//! either the collector's response or a transport error. Turning that into a
//! delivery decision is the classifier's job, not the client's.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use crashlane_core::{Clock, EventKey, EventRecord, Payload};
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    configuration::Configuration,
    error::{DeliveryError, Result},
    notifier::Notifier,
};

/// Envelope format version sent with every request.
pub const PAYLOAD_VERSION: &str = "4.0";

/// Uploads encoded event envelopes to a collector.
///
/// Implementations are shared by reference across all concurrently running
/// operations and must not hold per-request mutable state.
pub trait ApiClient: Send + Sync + 'static {
    /// Sends one request.
    ///
    /// Any HTTP response, including 4xx and 5xx, is returned as `Ok`; `Err`
    /// is reserved for failures that produced no response.
    fn upload(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + '_>>;
}

/// One encoded upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Event the request carries.
    pub event_key: EventKey,
    /// Collector URL.
    pub url: String,
    /// API key the event is reported under.
    pub api_key: String,
    /// JSON-encoded envelope.
    pub body: Bytes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    api_key: &'a str,
    payload_version: &'static str,
    notifier: &'a Notifier,
    events: [&'a Payload; 1],
}

impl UploadRequest {
    /// Encodes `event` into a request for the configured collector.
    ///
    /// The event's own API key takes precedence over the configured one.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the envelope cannot be encoded.
    pub fn for_event(
        event: &EventRecord,
        configuration: &Configuration,
        notifier: &Notifier,
    ) -> Result<Self> {
        let api_key = event.api_key().unwrap_or(configuration.api_key());
        let envelope = Envelope {
            api_key,
            payload_version: PAYLOAD_VERSION,
            notifier,
            events: [event.payload()],
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| DeliveryError::serialization(format!("failed to encode envelope: {e}")))?;

        Ok(Self {
            event_key: event.key().clone(),
            url: configuration.endpoint().to_string(),
            api_key: api_key.to_string(),
            body: Bytes::from(body),
        })
    }
}

/// Collector response to an upload.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

impl UploadResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Back-off requested through the `Retry-After` header.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        extract_retry_after_seconds(&self.headers)
    }
}

/// Configuration for [`HttpApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a whole request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: format!("crashlane/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP implementation of [`ApiClient`].
///
/// Holds one pooled reqwest client, so a single instance should be shared
/// by every operation.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl HttpApiClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    async fn send(&self, request: UploadRequest) -> Result<UploadResponse> {
        let start_time = self.clock.now();

        tracing::debug!(body_bytes = request.body.len(), "sending event");

        let http_request = self
            .client
            .post(&request.url)
            .header("content-type", "application/json")
            .header("X-Crashlane-Api-Key", &request.api_key)
            .header("X-Crashlane-Payload-Version", PAYLOAD_VERSION)
            .header("X-Crashlane-Sent-At", self.clock.now_utc().to_rfc3339())
            .body(request.body);

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) => {
                let duration = self.clock.now().saturating_duration_since(start_time);
                tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                if e.is_timeout() {
                    return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                }
                if e.is_builder() {
                    return Err(DeliveryError::configuration(format!("invalid request: {e}")));
                }
                if e.is_connect() {
                    return Err(DeliveryError::network(format!("connection failed: {e}")));
                }
                return Err(DeliveryError::network(e.to_string()));
            },
        };

        let duration = self.clock.now().saturating_duration_since(start_time);
        let upload_response = parse_response(response, duration).await;

        match upload_response.status_code {
            200..=299 => tracing::debug!(
                status = upload_response.status_code,
                duration_ms = duration.as_millis(),
                "event accepted"
            ),
            status => tracing::warn!(
                status,
                duration_ms = duration.as_millis(),
                "collector returned non-success status"
            ),
        }

        Ok(upload_response)
    }
}

impl ApiClient for HttpApiClient {
    fn upload(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + '_>> {
        let span = info_span!("event_upload", event_key = %request.event_key, url = %request.url);
        Box::pin(self.send(request).instrument(span))
    }
}

/// Parses an HTTP response, truncating oversized bodies.
async fn parse_response(response: Response, duration: Duration) -> UploadResponse {
    const MAX_BODY_SIZE: usize = 16 * 1024;
    const TRUNCATED_SIZE: usize = 1024;

    let status_code = response.status().as_u16();
    let headers = extract_headers(response.headers());

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..TRUNCATED_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            String::new()
        },
    };

    UploadResponse { status_code, headers, body, duration }
}

/// Extracts headers from a reqwest `HeaderMap` into a lowercase-keyed map.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|value| (key.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

/// Extracts a retry-after delay from response headers.
///
/// Supports both the delta-seconds and HTTP-date formats. An unparseable
/// value falls back to 60 seconds; a missing header yields `None`.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    const DEFAULT_RETRY_AFTER: u64 = 60;

    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;

    if let Ok(seconds) = retry_after.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let remaining = date_time.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return Some(remaining.to_std().map(|d| d.as_secs()).unwrap_or(0));
    }

    Some(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use crashlane_core::{EventOrigin, TestClock};
    use serde_json::{json, Value};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event(value: Value) -> EventRecord {
        let Value::Object(payload) = value else { unreachable!("fixture must be an object") };
        EventRecord::new(EventKey::new("crash-123"), payload, EventOrigin::InMemory)
    }

    fn configuration(endpoint: String) -> Configuration {
        Configuration::builder("configured-key", endpoint, "/tmp/crashlane-retry").build().unwrap()
    }

    fn client() -> HttpApiClient {
        HttpApiClient::new(ClientConfig::default(), Arc::new(TestClock::new())).unwrap()
    }

    #[test]
    fn envelope_wraps_single_event() {
        let notifier = Notifier::new("crashlane", "1.0.0", "https://example.com");
        let request = UploadRequest::for_event(
            &event(json!({ "context": "main" })),
            &configuration("https://notify.example.com".to_string()),
            &notifier,
        )
        .unwrap();

        let envelope: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(envelope["apiKey"], "configured-key");
        assert_eq!(envelope["payloadVersion"], PAYLOAD_VERSION);
        assert_eq!(envelope["notifier"]["name"], "crashlane");
        assert_eq!(envelope["events"], json!([{ "context": "main" }]));
        assert_eq!(request.url, "https://notify.example.com");
        assert_eq!(request.event_key.as_str(), "crash-123");
    }

    #[test]
    fn event_api_key_overrides_configuration() {
        let request = UploadRequest::for_event(
            &event(json!({ "apiKey": "event-key" })),
            &configuration("https://notify.example.com".to_string()),
            &Notifier::default(),
        )
        .unwrap();

        assert_eq!(request.api_key, "event-key");
    }

    #[tokio::test]
    async fn successful_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/notify"))
            .and(matchers::header("X-Crashlane-Api-Key", "configured-key"))
            .and(matchers::header("X-Crashlane-Payload-Version", PAYLOAD_VERSION))
            .and(matchers::header_exists("X-Crashlane-Sent-At"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = UploadRequest::for_event(
            &event(json!({})),
            &configuration(format!("{}/notify", mock_server.uri())),
            &Notifier::default(),
        )
        .unwrap();

        let response = client().upload(request).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.is_success());
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn error_statuses_are_returned_as_responses() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&mock_server)
            .await;

        let request = UploadRequest::for_event(
            &event(json!({})),
            &configuration(mock_server.uri()),
            &Notifier::default(),
        )
        .unwrap();

        let response = client().upload(request).await.unwrap();
        assert_eq!(response.status_code, 503);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn retry_after_header_is_exposed() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let request = UploadRequest::for_event(
            &event(json!({})),
            &configuration(mock_server.uri()),
            &Notifier::default(),
        )
        .unwrap();

        let response = client().upload(request).await.unwrap();
        assert_eq!(response.retry_after_seconds(), Some(120));
    }

    #[tokio::test]
    async fn unreachable_collector_is_a_network_error() {
        let request = UploadRequest::for_event(
            &event(json!({})),
            &configuration("http://127.0.0.1:9/notify".to_string()),
            &Notifier::default(),
        )
        .unwrap();

        let error = client().upload(request).await.unwrap_err();
        assert!(matches!(error, DeliveryError::NetworkError { .. }), "got {error:?}");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn slow_collector_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(100), ..Default::default() };
        let client = HttpApiClient::new(config, Arc::new(TestClock::new())).unwrap();
        let request = UploadRequest::for_event(
            &event(json!({})),
            &configuration(mock_server.uri()),
            &Notifier::default(),
        )
        .unwrap();

        let error = client.upload(request).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Timeout { .. }), "got {error:?}");
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HashMap::new();

        headers.insert("retry-after".to_string(), "120".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(120));

        headers.clear();
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert("retry-after".to_string(), "invalid".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(60));

        headers.insert("retry-after".to_string(), "Wed, 21 Oct 2015 07:28:00 GMT".to_string());
        assert_eq!(extract_retry_after_seconds(&headers), Some(0));
    }
}
