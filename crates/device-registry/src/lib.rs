//! device-registry: timestamped parameter store for discovered hardware devices
//!
//! Device types are described by a CSV schema source loaded once at startup. Each
//! registered device keeps one `(value, timestamp)` slot per schema parameter plus its
//! polling subscription. Reports from the device link are applied newest-wins, so late
//! or duplicated deliveries never roll state back.

mod error;
pub use error::{ConfigError, Error, Result, SchemaError};

mod schema;
pub use schema::{ParamRef, Schema};

mod loader;
pub use loader::{load_registry_config, RegistryConfig, SchemaRegistry};

mod state;
pub use state::{DeviceState, Subscription};

mod registry;
pub use registry::{DeviceRegistry, Registration};

mod metrics;
pub use metrics::{MetricsHub, RegistryMetrics};

pub use device_link::{DeviceLink, ParamValue, Timestamp, TypeId, Uid, UpdateSink};
