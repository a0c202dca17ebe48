//! Channel values and the endpoint capability trait.
//!
//! Every hardware control point on the rig is a scalar: an LED brightness, a
//! duration, or a shutter flag. [`ChannelValue`] carries that scalar and
//! [`ValueType`] declares what a channel accepts. [`Endpoint`] is the
//! capability-set interface both the live and the simulated backends implement.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A typed scalar written to or read from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Boolean flag
    Boolean(bool),
    /// Signed integer
    Integer(i64),
    /// Floating point
    Float(f64),
}

impl ChannelValue {
    /// Zero value of the given type, used as the initial simulated state.
    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Integer => ChannelValue::Integer(0),
            ValueType::Float => ChannelValue::Float(0.0),
            ValueType::Boolean => ChannelValue::Boolean(false),
        }
    }

    /// Value as f64 (booleans map to 0.0 / 1.0).
    pub fn as_f64(&self) -> f64 {
        match *self {
            ChannelValue::Boolean(b) => f64::from(u8::from(b)),
            ChannelValue::Integer(i) => i as f64,
            ChannelValue::Float(f) => f,
        }
    }

    /// The natural type of this value, before any coercion.
    pub fn value_type(&self) -> ValueType {
        match self {
            ChannelValue::Boolean(_) => ValueType::Boolean,
            ChannelValue::Integer(_) => ValueType::Integer,
            ChannelValue::Float(_) => ValueType::Float,
        }
    }

    /// Wire representation for channel-access tools. Booleans go out as 0/1.
    pub fn to_wire(&self) -> String {
        match *self {
            ChannelValue::Boolean(b) => u8::from(b).to_string(),
            ChannelValue::Integer(i) => i.to_string(),
            ChannelValue::Float(f) => f.to_string(),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Boolean(b) => write!(f, "{}", u8::from(*b)),
            ChannelValue::Integer(i) => write!(f, "{i}"),
            ChannelValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ChannelValue {
    fn from(value: bool) -> Self {
        ChannelValue::Boolean(value)
    }
}

impl From<i64> for ChannelValue {
    fn from(value: i64) -> Self {
        ChannelValue::Integer(value)
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        ChannelValue::Float(value)
    }
}

/// Declared value type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Signed integer
    Integer,
    /// Floating point
    Float,
    /// Written as 0/1 on the wire
    Boolean,
}

impl ValueType {
    /// Coerce `value` into this type.
    ///
    /// Returns `None` when the value cannot be represented without loss:
    /// non-integral floats into integer channels, anything other than 0/1 into
    /// boolean channels, and non-finite floats anywhere.
    pub fn coerce(&self, value: ChannelValue) -> Option<ChannelValue> {
        match (self, value) {
            (_, ChannelValue::Float(f)) if !f.is_finite() => None,

            (ValueType::Float, ChannelValue::Float(f)) => Some(ChannelValue::Float(f)),
            (ValueType::Float, ChannelValue::Integer(i)) => Some(ChannelValue::Float(i as f64)),
            (ValueType::Float, ChannelValue::Boolean(_)) => None,

            (ValueType::Integer, ChannelValue::Integer(i)) => Some(ChannelValue::Integer(i)),
            (ValueType::Integer, ChannelValue::Float(f)) => {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(ChannelValue::Integer(f as i64))
                } else {
                    None
                }
            }
            (ValueType::Integer, ChannelValue::Boolean(_)) => None,

            (ValueType::Boolean, ChannelValue::Boolean(b)) => Some(ChannelValue::Boolean(b)),
            (ValueType::Boolean, ChannelValue::Integer(0)) => Some(ChannelValue::Boolean(false)),
            (ValueType::Boolean, ChannelValue::Integer(1)) => Some(ChannelValue::Boolean(true)),
            (ValueType::Boolean, ChannelValue::Integer(_)) => None,
            (ValueType::Boolean, ChannelValue::Float(f)) => {
                if f == 0.0 {
                    Some(ChannelValue::Boolean(false))
                } else if f == 1.0 {
                    Some(ChannelValue::Boolean(true))
                } else {
                    None
                }
            }
        }
    }

    /// Parse a textual reading (as returned by channel-access tools) into this type.
    pub fn parse(&self, text: &str) -> Option<ChannelValue> {
        let text = text.trim();
        let raw = if let Ok(i) = text.parse::<i64>() {
            ChannelValue::Integer(i)
        } else if let Ok(f) = text.parse::<f64>() {
            ChannelValue::Float(f)
        } else {
            return None;
        };
        self.coerce(raw)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Read/write capability of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Reads only
    ReadOnly,
    /// Writes only
    WriteOnly,
    /// Reads and writes
    #[default]
    ReadWrite,
}

impl Access {
    /// True if reads are allowed.
    pub fn readable(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    /// True if writes are allowed.
    pub fn writable(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Backend that performs the actual read/write of one channel.
///
/// Values handed to `write` have already been coerced to the channel's
/// declared type by the registry. Implementations own their timeout and retry
/// behavior; the run engine treats every call as a single blocking attempt.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Current value of the channel.
    async fn read(&self) -> Result<ChannelValue>;
    /// Set the channel. Returns once the backend accepted the value.
    async fn write(&self, value: ChannelValue) -> Result<()>;

    /// Human-readable description (PV name, "simulated", ...).
    fn describe(&self) -> String;
}
