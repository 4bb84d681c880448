//! Native lumen amounts, held as integer stroops.

use crate::errors::AmountError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const STROOPS_PER_LUMEN: i64 = 10_000_000;
const DECIMALS: usize = 7;

/// Network minimum fee per operation, in stroops
pub const BASE_FEE: u32 = 100;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lumens(i64);

impl Lumens {
    pub const ZERO: Lumens = Lumens(0);

    pub const fn from_stroops(stroops: i64) -> Self {
        Self(stroops)
    }

    pub const fn from_whole(lumens: i64) -> Self {
        Self(lumens * STROOPS_PER_LUMEN)
    }

    pub const fn stroops(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl FromStr for Lumens {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || AmountError(s.to_string());

        let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > DECIMALS {
            return Err(invalid());
        }
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !digits(whole) || !digits(fraction) {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let fraction: i64 = if fraction.is_empty() {
            0
        } else {
            format!("{:0<width$}", fraction, width = DECIMALS)
                .parse()
                .map_err(|_| invalid())?
        };

        whole
            .checked_mul(STROOPS_PER_LUMEN)
            .and_then(|stroops| stroops.checked_add(fraction))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Lumens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = STROOPS_PER_LUMEN as u64;
        write!(f, "{}{}.{:07}", sign, abs / scale, abs % scale)
    }
}

impl fmt::Debug for Lumens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lumens({})", self)
    }
}

impl Serialize for Lumens {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lumens {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
