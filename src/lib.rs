//! Crashlane flush service.
//!
//! Loads settings, wires the delivery pipeline together and runs one flush
//! pass over the retry directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod flush;

pub use config::Settings;
pub use flush::{flush, FlushReport};
