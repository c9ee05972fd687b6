//! Fixed-point decimal types for prices and volumes
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Percentages and change rates are rounded HALF_UP to 2 decimal places,
//! matching conventional financial display rules.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::TickError;

/// Decimal places used for percentages and change rates.
pub const PERCENT_DP: u32 = 2;

/// Round a value HALF_UP to 2 decimal places.
pub fn round_half_up_2(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(PERCENT_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Change rate of `price` against `opening`, in percent.
///
/// Returns `None` when the opening price is zero or the rate does not fit
/// in a `Decimal`.
pub fn change_rate_pct(price: Decimal, opening: Decimal) -> Option<Decimal> {
    if opening.is_zero() {
        return None;
    }
    let delta = price.checked_sub(opening)?;
    let rate = match delta.checked_mul(Decimal::ONE_HUNDRED) {
        Some(scaled) => scaled.checked_div(opening)?,
        None => delta.checked_div(opening)?.checked_mul(Decimal::ONE_HUNDRED)?,
    };
    Some(round_half_up_2(rate))
}

/// Share of `part` in `total`, in percent. Zero when `total` is not positive.
pub fn percentage_of(part: Decimal, total: Decimal) -> Decimal {
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let share = match part.checked_mul(Decimal::ONE_HUNDRED) {
        Some(scaled) => scaled.checked_div(total),
        None => part
            .checked_div(total)
            .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED)),
    };
    share.map(round_half_up_2).unwrap_or(Decimal::ZERO)
}

/// Strictly positive price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// # Panics
    /// Panics if `value` is not strictly positive
    pub fn new(value: Decimal) -> Self {
        Self::try_new(value).expect("Price must be strictly positive")
    }

    /// Returns `None` for zero or negative values.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::new(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|_| TickError::Unparsable(s.to_string()))?;
        Self::try_new(value).ok_or_else(|| TickError::NonPositivePrice(value.to_string()))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traded volume (share count). Zero is a valid print with no reported size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volume(u64);

impl Volume {
    pub const ZERO: Volume = Volume(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns `None` for negative input.
    pub fn try_from_signed(value: i64) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    pub fn saturating_add(self, other: Volume) -> Volume {
        Volume(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading value of a print: price × volume.
///
/// `None` when the product overflows `Decimal`.
pub fn trading_value(price: Decimal, volume: Volume) -> Option<Decimal> {
    price.checked_mul(volume.as_decimal())
}

/// Sum of `values`, or `None` on overflow.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}
