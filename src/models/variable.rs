//! The closed set of canonical meteorological variables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical variable identity.
///
/// The variable space is closed: every fetcher translates its provider's
/// parameter names onto these four, and every metric and snapshot row carries
/// one of them. The relational column stays a short string for forward
/// compatibility; [`Variable::as_str`] / [`FromStr`] are that boundary.
///
/// The enum order is the canonical processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    /// Accumulated precipitation, millimetres.
    Precip,
    /// 10-metre wind speed, metres per second. Always derived from U/V.
    WindSpeed,
    /// Mean sea-level pressure, pascals.
    Mslp,
    /// 500-hPa geopotential height, metres.
    Hgt500,
}

impl Variable {
    /// All canonical variables, in canonical order.
    pub const ALL: [Variable; 4] = [
        Variable::Precip,
        Variable::WindSpeed,
        Variable::Mslp,
        Variable::Hgt500,
    ];

    /// Canonical short name used in the relational store and array handles.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::Precip => "precip",
            Variable::WindSpeed => "wind_speed",
            Variable::Mslp => "mslp",
            Variable::Hgt500 => "hgt_500",
        }
    }

    /// Fixed physical unit of the canonical representation.
    pub fn unit(&self) -> &'static str {
        match self {
            Variable::Precip => "mm",
            Variable::WindSpeed => "m/s",
            Variable::Mslp => "Pa",
            Variable::Hgt500 => "m",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "precip" => Ok(Variable::Precip),
            "wind_speed" => Ok(Variable::WindSpeed),
            "mslp" => Ok(Variable::Mslp),
            "hgt_500" => Ok(Variable::Hgt500),
            other => Err(format!("unknown variable: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for var in Variable::ALL {
            assert_eq!(var.as_str().parse::<Variable>().unwrap(), var);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("temperature".parse::<Variable>().is_err());
    }

    #[test]
    fn canonical_order_is_stable() {
        let mut sorted = Variable::ALL;
        sorted.sort();
        assert_eq!(sorted, Variable::ALL);
    }

    #[test]
    fn units_are_fixed() {
        assert_eq!(Variable::Precip.unit(), "mm");
        assert_eq!(Variable::WindSpeed.unit(), "m/s");
        assert_eq!(Variable::Mslp.unit(), "Pa");
        assert_eq!(Variable::Hgt500.unit(), "m");
    }
}
