//! Channel addressing

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Stable `(component, channel)` identifier of a channel
///
/// Displayed and parsed as `component/channel`, e.g. `meter0/ActivePower`.
/// Cheap to clone; both parts are interned strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    component: Arc<str>,
    channel: Arc<str>,
}

impl ChannelAddress {
    /// Create an address from component and channel ids
    pub fn new(component: impl AsRef<str>, channel: impl AsRef<str>) -> Self {
        Self {
            component: Arc::from(component.as_ref()),
            channel: Arc::from(channel.as_ref()),
        }
    }

    /// Component id (e.g. `meter0`)
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Channel id within the component (e.g. `ActivePower`)
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.channel)
    }
}

impl FromStr for ChannelAddress {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((component, channel)) if !component.is_empty() && !channel.is_empty() => {
                Ok(Self::new(component, channel))
            }
            _ => Err(ChannelError::InvalidAddress(s.to_string())),
        }
    }
}

impl Serialize for ChannelAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: ChannelAddress = "meter0/ActivePower".parse().unwrap();
        assert_eq!(addr.component(), "meter0");
        assert_eq!(addr.channel(), "ActivePower");
        assert_eq!(addr.to_string(), "meter0/ActivePower");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("no-slash".parse::<ChannelAddress>().is_err());
        assert!("/leading".parse::<ChannelAddress>().is_err());
        assert!("trailing/".parse::<ChannelAddress>().is_err());
    }
}
