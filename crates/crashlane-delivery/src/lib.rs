//! Retry-aware event upload pipeline.
//!
//! This crate delivers crash and error events to a collector. Each pending
//! event is handled by one [`UploadOperation`] that loads it, checks whether
//! configuration allows sending it, uploads it, and resolves the result into
//! exactly one terminal action on the event's source.
//!
//! # Architecture
//!
//! A driver creates one operation per pending event and submits it to an
//! [`OperationPool`]. Operations share a single [`OperationHost`] which
//! supplies the API client, configuration and notifier:
//!
//! 1. **Load** - Materialize the event; unloadable events are deleted
//! 2. **Eligibility** - Apply the should-send policy; ineligible events are
//!    deleted
//! 3. **Upload** - Send the envelope, abandoning it if cancelled in flight
//! 4. **Resolve** - Delete on delivery or permanent rejection, persist the
//!    payload into the retry directory on transient failure
//!
//! # Key Features
//!
//! - **Cause-based Classification** - Retry decisions come from the HTTP
//!   status or transport error kind, see [`outcome`]
//! - **Partitioned Side Effects** - Every execution deletes, stores, or
//!   leaves the source untouched, never more than one of these
//! - **Cooperative Cancellation** - Checked before load, before upload, and
//!   raced against the in-flight request
//! - **Bounded Concurrency** - The pool caps concurrently running operations
//!   and isolates panics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crashlane_core::RealClock;
//! use crashlane_delivery::{
//!     ClientConfig, Configuration, DeliveryError, DeliveryHost, HttpApiClient, Notifier,
//!     OperationPool, PoolConfig, RetryStore, UploadOperation,
//! };
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let configuration = Configuration::builder(
//!     "your-api-key",
//!     "https://notify.example.com",
//!     "/var/lib/crashlane/events",
//! )
//! .build()?;
//! let client = HttpApiClient::new(ClientConfig::default(), Arc::new(RealClock::new()))?;
//! let host = Arc::new(DeliveryHost::new(
//!     Arc::new(client),
//!     Arc::new(configuration.clone()),
//!     Notifier::default(),
//! ));
//!
//! let mut pool = OperationPool::new(PoolConfig::default());
//! for event in RetryStore::new(configuration.retry_directory()).pending().await? {
//!     pool.submit(UploadOperation::with_cancellation(event, &host, pool.child_token())).await;
//! }
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod configuration;
pub mod error;
pub mod host;
pub mod notifier;
pub mod operation;
pub mod outcome;
pub mod pool;
pub mod source;
pub mod store;

pub use client::{ApiClient, ClientConfig, HttpApiClient, UploadRequest, UploadResponse};
pub use configuration::{Configuration, ConfigurationBuilder, Ineligibility};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use host::{DeliveryHost, OperationHost};
pub use notifier::Notifier;
pub use operation::{Canceller, Completion, UploadOperation};
pub use outcome::{Classification, DeliveryOutcome, Disposition, OutcomeKind};
pub use pool::{OperationHandle, OperationPool, PoolConfig, PoolStats};
pub use source::{EventSource, FileBackedEvent, InMemoryEvent};
pub use store::RetryStore;

/// Default number of concurrently executing upload operations.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
