// =============================================================================
// Market data — interval taxonomy and the polling data provider
// =============================================================================

pub mod provider;

pub use provider::DataProvider;

use serde::{Deserialize, Serialize};

/// Supported OHLCV intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    M5,
    M10,
    M15,
    M30,
    M60,
    D1,
}

impl Interval {
    /// Broker API interval code.
    pub fn broker_code(self) -> &'static str {
        match self {
            Self::M5 => "5minute",
            Self::M10 => "10minute",
            Self::M15 => "15minute",
            Self::M30 => "30minute",
            Self::M60 => "60minute",
            Self::D1 => "day",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M5 => write!(f, "5m"),
            Self::M10 => write!(f, "10m"),
            Self::M15 => write!(f, "15m"),
            Self::M30 => write!(f, "30m"),
            Self::M60 => write!(f, "60m"),
            Self::D1 => write!(f, "1d"),
        }
    }
}
