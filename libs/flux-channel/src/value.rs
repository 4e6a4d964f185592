//! Channel value and type declarations

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Typed channel value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(f64::from(*i)),
            Self::Long(l) => Some(*l as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.parse().ok(),
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(i64::from(*i)),
            Self::Long(l) => Some(*l),
            Self::Float(f) => Some(f.round() as i64),
            Self::Text(s) => s.parse().ok(),
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Long(l) => Some(*l != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::Text(_) => None,
        }
    }

    /// Short name of the value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// ============================================================================
// Option sets for enumerated channels
// ============================================================================

/// Named mapping from raw integers to option names
///
/// Unknown raw values are legal on the wire and render as `Undefined(<raw>)`;
/// a device reporting a state the profile does not know must not fault the
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSet {
    name: String,
    options: Vec<(i32, String)>,
}

impl OptionSet {
    pub fn new(name: impl Into<String>, options: Vec<(i32, impl Into<String>)>) -> Self {
        Self {
            name: name.into(),
            options: options.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Option name for a raw value, if known
    pub fn option_name(&self, raw: i32) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| *k == raw)
            .map(|(_, v)| v.as_str())
    }

    /// Raw value for an option name, if known
    pub fn raw_of(&self, name: &str) -> Option<i32> {
        self.options
            .iter()
            .find(|(_, v)| v.eq_ignore_ascii_case(name))
            .map(|(k, _)| *k)
    }

    /// Human-readable label, falling back to `Undefined(<raw>)`
    pub fn label(&self, raw: i32) -> String {
        self.option_name(raw)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Undefined({raw})"))
    }
}

// ============================================================================
// Channel type and access declarations
// ============================================================================

/// Declared semantic type of a channel; never changes after creation
#[derive(Debug, Clone)]
pub enum ChannelKind {
    Boolean,
    Integer,
    Long,
    Float,
    /// Fixed-length text, capacity in bytes
    Text {
        length: usize,
    },
    /// Integer-backed enumerated option set
    Enumerated {
        options: Arc<OptionSet>,
    },
}

impl ChannelKind {
    /// Whether a value matches this declared type
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Integer, Value::Int(_)) => true,
            (Self::Long, Value::Long(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Text { length }, Value::Text(s)) => s.len() <= *length,
            (Self::Enumerated { .. }, Value::Int(_)) => true,
            _ => false,
        }
    }

    /// Short name of the declared type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Text { .. } => "text",
            Self::Enumerated { .. } => "enumerated",
        }
    }
}

/// Channel access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadOnly => "READ_ONLY",
            Self::WriteOnly => "WRITE_ONLY",
            Self::ReadWrite => "READ_WRITE",
        };
        write!(f, "{s}")
    }
}

/// Engineering unit annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    None,
    Watt,
    Kilowatt,
    WattHours,
    KilowattHours,
    Volt,
    Millivolt,
    Ampere,
    Milliampere,
    VoltAmpereReactive,
    Hertz,
    DegreeCelsius,
    Percent,
    Milliseconds,
    Seconds,
}

impl Unit {
    /// Display symbol, empty for unitless channels
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Watt => "W",
            Self::Kilowatt => "kW",
            Self::WattHours => "Wh",
            Self::KilowattHours => "kWh",
            Self::Volt => "V",
            Self::Millivolt => "mV",
            Self::Ampere => "A",
            Self::Milliampere => "mA",
            Self::VoltAmpereReactive => "var",
            Self::Hertz => "Hz",
            Self::DegreeCelsius => "°C",
            Self::Percent => "%",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Int(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float(3.6).as_i64(), Some(4));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Long(7).as_bool(), Some(true));
        assert_eq!(Value::Text("12".into()).as_i64(), Some(12));
    }

    #[test]
    fn test_kind_accepts() {
        assert!(ChannelKind::Boolean.accepts(&Value::Bool(true)));
        assert!(!ChannelKind::Boolean.accepts(&Value::Int(1)));
        assert!(ChannelKind::Long.accepts(&Value::Long(1)));
        assert!(!ChannelKind::Long.accepts(&Value::Int(1)));
        assert!(ChannelKind::Text { length: 4 }.accepts(&Value::Text("abcd".into())));
        assert!(!ChannelKind::Text { length: 4 }.accepts(&Value::Text("abcde".into())));
    }

    #[test]
    fn test_option_set() {
        let options = OptionSet::new(
            "GridMode",
            vec![(1, "ON_GRID"), (2, "OFF_GRID")],
        );
        assert_eq!(options.option_name(1), Some("ON_GRID"));
        assert_eq!(options.raw_of("off_grid"), Some(2));
        assert_eq!(options.label(9), "Undefined(9)");

        let kind = ChannelKind::Enumerated {
            options: Arc::new(options),
        };
        assert!(kind.accepts(&Value::Int(9)));
        assert!(!kind.accepts(&Value::Float(1.0)));
    }
}
