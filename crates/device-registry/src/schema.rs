use crate::SchemaError;
use device_link::TypeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A parameter named either way at the public API. Resolved to an index once, by
/// [`Schema::resolve`]; everything behind the API works in indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRef {
    Index(usize),
    Name(String),
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamRef::Index(i) => write!(f, "#{i}"),
            ParamRef::Name(name) => write!(f, "{name:?}"),
        }
    }
}

impl From<usize> for ParamRef {
    fn from(i: usize) -> Self {
        ParamRef::Index(i)
    }
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        ParamRef::Name(name.to_string())
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        ParamRef::Name(name)
    }
}

impl FromStr for ParamRef {
    type Err = std::convert::Infallible;

    /// All-digit input is an index, anything else a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Ok(match t.parse::<usize>() {
            Ok(i) => ParamRef::Index(i),
            Err(_) => ParamRef::Name(t.to_string()),
        })
    }
}

/// Ordered parameter names of one device type
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    type_id: TypeId,
    name: String,
    params: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(
        type_id: TypeId,
        name: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let params: Vec<String> = params
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        let mut index = HashMap::with_capacity(params.len());
        for (i, p) in params.iter().enumerate() {
            if index.insert(p.clone(), i).is_some() {
                return Err(SchemaError::DuplicateParam {
                    type_name: name,
                    name: p.clone(),
                });
            }
        }
        Ok(Self {
            type_id,
            name,
            params,
            index,
        })
    }

    /// Build from one configuration row: `type id (hex), type name, param...`.
    /// Empty parameter fields are dropped; order is kept.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, SchemaError> {
        let raw_id = row.first().map(|s| s.as_ref()).unwrap_or_default();
        let type_id = parse_type_id(raw_id)?;
        let name = row.get(1).ok_or(SchemaError::MissingName)?.as_ref();
        Self::new(type_id, name, row[2..].iter().map(|p| p.as_ref()))
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn param_name(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn resolve(&self, param: &ParamRef) -> Option<usize> {
        match param {
            ParamRef::Index(i) if *i < self.params.len() => Some(*i),
            ParamRef::Index(_) => None,
            ParamRef::Name(name) => self.index_of(name),
        }
    }

    pub fn contains(&self, param: &ParamRef) -> bool {
        self.resolve(param).is_some()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceType {}: {}", self.type_id, self.name)?;
        for p in &self.params {
            write!(f, "\n    {p}")?;
        }
        Ok(())
    }
}

fn parse_type_id(raw: &str) -> Result<TypeId, SchemaError> {
    let t = raw.trim();
    let hex = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    u16::from_str_radix(hex, 16)
        .map(TypeId)
        .map_err(|_| SchemaError::InvalidTypeId(t.to_string()))
}
