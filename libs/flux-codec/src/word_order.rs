//! Word order representation for multi-register values
//!
//! Register buses transfer 16-bit words; values wider than one word are
//! split across consecutive registers. Devices disagree about which word
//! carries the most significant half, so every multi-word conversion takes
//! an explicit [`WordOrder`]. Bytes inside a word are always big-endian on
//! the wire (network order).

use serde::{Deserialize, Serialize};

/// Order of 16-bit words when combining registers into 32/64-bit values
///
/// For the 32-bit value `0x12345678`:
/// - `MswLsw`: registers `[0x1234, 0x5678]` (most significant word first)
/// - `LswMsw`: registers `[0x5678, 0x1234]` (least significant word first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// Most significant word first (the common "big-endian register" layout)
    #[default]
    MswLsw,
    /// Least significant word first (word-swapped devices)
    LswMsw,
}

impl WordOrder {
    /// Parse from common configuration spellings
    ///
    /// Accepts `"msw_lsw"`, `"MSWLSW"`, `"big"`, `"lsw_msw"`, `"little"`
    /// and similar; returns `None` for anything else.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.to_uppercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "MSWLSW" | "BIG" | "BE" => Some(Self::MswLsw),
            "LSWMSW" | "LITTLE" | "LE" => Some(Self::LswMsw),
            _ => None,
        }
    }

    /// Descriptive name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MswLsw => "MSW-LSW",
            Self::LswMsw => "LSW-MSW",
        }
    }

    /// Whether the most significant word is transferred first
    pub fn msw_first(&self) -> bool {
        matches!(self, Self::MswLsw)
    }
}

impl std::fmt::Display for WordOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
