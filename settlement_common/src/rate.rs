use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::Cents;

/// Rates are stored as parts-per-million. `PPM_SCALE` is 100%.
pub const PPM_SCALE: i64 = 1_000_000;

/// Integer division of `num / den`, rounding to the nearest integer and sending exact halves to the even neighbour.
///
/// `den` must be non-zero. A negative denominator is handled by flipping the signs of both operands.
pub fn div_round_half_even(num: i128, den: i128) -> i128 {
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let quotient = num.div_euclid(den);
    let twice_remainder = num.rem_euclid(den) * 2;
    match twice_remainder.cmp(&den) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 == 0 => quotient,
        std::cmp::Ordering::Equal => quotient + 1,
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid rate: {0}")]
pub struct RateConversionError(String);

/// A percentage rate with a resolution of one part per million (0.0001%).
///
/// Over the wire a rate is a plain percentage number (`12.5` means 12.5%). In storage it is an integer number of
/// parts per million, so that rules compare and round exactly.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "f64", into = "f64")]
pub struct Rate(i64);

impl Rate {
    pub const fn from_ppm(ppm: i64) -> Self {
        Self(ppm)
    }

    pub fn from_percent(percent: f64) -> Result<Self, RateConversionError> {
        if !percent.is_finite() {
            return Err(RateConversionError(format!("{percent} is not a finite number")));
        }
        let ppm = (percent * (PPM_SCALE as f64 / 100.0)).round();
        if ppm.abs() > i64::MAX as f64 {
            return Err(RateConversionError(format!("{percent}% is out of range")));
        }
        Ok(Self(ppm as i64))
    }

    pub fn ppm(&self) -> i64 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        self.0 as f64 * 100.0 / PPM_SCALE as f64
    }

    /// True if the rate lies in the closed interval [0%, 100%].
    pub fn is_valid_percentage(&self) -> bool {
        (0..=PPM_SCALE).contains(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Applies the rate to `amount`, rounding half-to-even to the nearest minor unit.
    pub fn apply(&self, amount: Cents) -> Cents {
        let scaled = i128::from(amount.value()) * i128::from(self.0);
        let rounded = div_round_half_even(scaled, i128::from(PPM_SCALE));
        // |rate| <= 100% keeps the result within the range of the input
        Cents::from(rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }
}

impl TryFrom<f64> for Rate {
    type Error = RateConversionError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_percent(value)
    }
}

impl From<Rate> for f64 {
    fn from(rate: Rate) -> Self {
        rate.as_percent()
    }
}

impl Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.as_percent())
    }
}

impl FromStr for Rate {
    type Err = RateConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        let percent = number.parse::<f64>().map_err(|e| RateConversionError(format!("'{s}': {e}")))?;
        Self::from_percent(percent)
    }
}
