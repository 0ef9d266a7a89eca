//! Core event model for the crashlane delivery pipeline.
//!
//! Provides the record type that flows through an upload operation, the
//! strongly-typed identity every stored payload is keyed by, the load error
//! taxonomy, and the clock abstraction shared by the delivery crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{LoadError, Result};
pub use models::{EventKey, EventOrigin, EventRecord, Payload};
pub use time::{Clock, RealClock, TestClock};
