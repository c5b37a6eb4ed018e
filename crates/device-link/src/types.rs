use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// 88-bit device uid: 16-bit type, 8-bit year, 64-bit random id (most significant first)
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid(u128);

impl Uid {
    pub const BITS: u32 = 88;
    const TYPE_SHIFT: u32 = 72;
    const YEAR_SHIFT: u32 = 64;

    pub fn new(raw: u128) -> Option<Self> {
        if raw >> Self::BITS == 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub fn from_parts(device_type: TypeId, year: u8, id: u64) -> Self {
        Self(
            (u128::from(device_type.0) << Self::TYPE_SHIFT)
                | (u128::from(year) << Self::YEAR_SHIFT)
                | u128::from(id),
        )
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn device_type(&self) -> TypeId {
        TypeId((self.0 >> Self::TYPE_SHIFT) as u16)
    }

    pub fn year(&self) -> u8 {
        (self.0 >> Self::YEAR_SHIFT) as u8
    }

    pub fn id(&self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{raw:022X}", raw = self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UidParseError {
    #[error("not a number: {0:?}")]
    NotANumber(String),
    #[error("uid wider than 88 bits: {0}")]
    TooWide(String),
}

impl FromStr for Uid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let raw = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            u128::from_str_radix(hex, 16)
        } else {
            t.parse::<u128>()
        }
        .map_err(|_| UidParseError::NotANumber(t.to_string()))?;
        Uid::new(raw).ok_or_else(|| UidParseError::TooWide(t.to_string()))
    }
}

impl TryFrom<String> for Uid {
    type Error = UidParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.to_string()
    }
}

/// Device type identifier as carried in the top 16 bits of a [`Uid`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u16);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{raw:04X}", raw = self.0)
    }
}

impl From<u16> for TypeId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Seconds on the communication layer's clock.
///
/// [`Timestamp::NEVER`] sorts below every real reading, so a parameter that has never
/// been reported loses to the first update that arrives. NaN never compares greater than
/// anything, which makes a NaN-stamped update a no-op under the newest-wins rule.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub const NEVER: Timestamp = Timestamp(f64::NEG_INFINITY);

    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn now() -> Self {
        OffsetDateTime::now_utc().into()
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    pub fn is_never(&self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    /// Strict ordering used by every newest-wins gate.
    pub fn is_newer_than(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::NEVER
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(t: OffsetDateTime) -> Self {
        Self(t.unix_timestamp_nanos() as f64 / 1e9)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            f.write_str("never")
        } else {
            write!(f, "{:.6}", self.0)
        }
    }
}

/// Opaque parameter payload. The registry stores it; it never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::Int(0)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}
