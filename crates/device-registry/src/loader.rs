use crate::{ConfigError, Schema};
use anyhow::Context;
use device_link::{TypeId, Uid, UidParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Every known device type, keyed by type id. Immutable once loaded.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<TypeId, Arc<Schema>>,
}

impl SchemaRegistry {
    /// Load a CSV schema source. The first row is a header and is skipped.
    /// Any unreadable or invalid row fails the whole load.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let reg = Self::from_reader(file)?;
        info!(path = %path.display(), types = reg.len(), "loaded device schemas");
        Ok(reg)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, ConfigError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let mut reg = Self::default();
        for record in reader.records().skip(1) {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let fields: Vec<&str> = record.iter().collect();
            let schema =
                Schema::from_row(&fields).map_err(|source| ConfigError::Schema { line, source })?;
            debug!(line, type_id = %schema.type_id(), name = schema.name(), "parsed schema row");
            reg.insert(schema)?;
        }
        Ok(reg)
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = Schema>) -> Result<Self, ConfigError> {
        let mut reg = Self::default();
        for schema in schemas {
            reg.insert(schema)?;
        }
        Ok(reg)
    }

    fn insert(&mut self, schema: Schema) -> Result<(), ConfigError> {
        let type_id = schema.type_id();
        if self.schemas.contains_key(&type_id) {
            return Err(ConfigError::DuplicateTypeId(type_id));
        }
        self.schemas.insert(type_id, Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, type_id: TypeId) -> Option<&Arc<Schema>> {
        self.schemas.get(&type_id)
    }

    /// Schemas ordered by type id
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Runtime configuration for a registry process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RegistryConfig {
    /// CSV schema source; relative paths resolve against the config file
    pub schema_file: PathBuf,
    /// Device uids to register at startup (decimal or 0x hex)
    #[serde(default)]
    pub devices: Vec<String>,
    /// Subscribe every startup device at this interval
    #[serde(default)]
    pub default_delay_ms: Option<u16>,
}

impl RegistryConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn uids(&self) -> Result<Vec<Uid>, UidParseError> {
        self.devices.iter().map(|s| s.parse()).collect()
    }
}

pub fn load_registry_config(path: impl AsRef<Path>) -> anyhow::Result<RegistryConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    let mut cfg = RegistryConfig::from_yaml_str(&raw)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    if cfg.schema_file.is_relative() {
        if let Some(dir) = path.parent() {
            cfg.schema_file = dir.join(&cfg.schema_file);
        }
    }
    cfg.uids()
        .with_context(|| format!("device list in {}", path.display()))?;
    Ok(cfg)
}
