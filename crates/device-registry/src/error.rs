use crate::ParamRef;
use device_link::{LinkError, TypeId, Uid};
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A schema row that cannot describe a device type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid device type id {0:?}: expected unsigned hex")]
    InvalidTypeId(String),
    #[error("missing device type name")]
    MissingName,
    #[error("duplicate parameter {name:?} in device type {type_name}")]
    DuplicateParam { type_name: String, name: String },
}

/// Load-time failures. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema source: {0}")]
    Csv(#[from] csv::Error),
    #[error("schema row {line}: {source}")]
    Schema {
        line: u64,
        #[source]
        source: SchemaError,
    },
    #[error("device type {0} defined more than once")]
    DuplicateTypeId(TypeId),
    #[error("parsing runtime config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Per-call failures returned to application code and to the link
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown device {0}")]
    UnknownDevice(Uid),
    #[error("device {uid} has unknown type {type_id}")]
    UnknownDeviceType { uid: Uid, type_id: TypeId },
    #[error("parameter {param} does not exist on device {uid}")]
    UnknownParameter { uid: Uid, param: ParamRef },
    #[error("invalid delay {0}: must be within 0..=65535 ms")]
    InvalidDelay(i64),
    #[error("device link unavailable: {0}")]
    CollaboratorUnavailable(#[from] LinkError),
}
