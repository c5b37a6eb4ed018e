//! device-link: the boundary between the device registry and the communication layer
//!
//! This crate holds the vocabulary both sides agree on (device uids, type ids, timestamps
//! and parameter payloads) and the two traits that cross the boundary: [`DeviceLink`], the
//! fire-and-forget request surface the registry drives, and [`UpdateSink`], the callback
//! surface the communication layer reports hardware responses into. The default build
//! enables a `mock` backend so that binaries and tests can run without hardware.

mod types;
pub use types::{ParamValue, Timestamp, TypeId, Uid, UidParseError};

mod error;
pub use error::{LinkError, Result};

mod traits;
pub use traits::{DeviceLink, UpdateSink};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{LinkRequest, MockLink};
