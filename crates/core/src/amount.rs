//! Amount scaling between source and destination token units.
//!
//! Source amounts are integers with `source_decimals` places, destination amounts are
//! integers with `destination_decimals` places. Conversion truncates toward zero and
//! the same rule applies to mints and burns.

use alloy_primitives::U256;

use crate::constants::{DEFAULT_DESTINATION_DECIMALS, DEFAULT_SOURCE_DECIMALS, MAX_DECIMALS};
use crate::error::{CoreError, Result};

/// Decimal configuration of the two ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountScale {
    source_decimals: u8,
    destination_decimals: u8,
}

impl AmountScale {
    /// Create a scale, validating both decimal counts.
    pub fn new(source_decimals: u8, destination_decimals: u8) -> Result<Self> {
        for decimals in [source_decimals, destination_decimals] {
            if decimals > MAX_DECIMALS {
                return Err(CoreError::InvalidDecimals(decimals));
            }
        }
        Ok(Self {
            source_decimals,
            destination_decimals,
        })
    }

    /// Source decimals.
    pub const fn source_decimals(&self) -> u8 {
        self.source_decimals
    }

    /// Destination decimals.
    pub const fn destination_decimals(&self) -> u8 {
        self.destination_decimals
    }

    /// Convert a source amount to destination units.
    ///
    /// # Errors
    ///
    /// `AmountTooSmall` when the result truncates to zero, `AmountOverflow` when it does
    /// not fit a `u64`.
    ///
    /// # Example
    ///
    /// ```
    /// use meshbridge_core::{AmountScale, U256};
    ///
    /// let scale = AmountScale::default();
    /// // 1.5 tokens at 18 decimals -> 1.5 tokens at 8 decimals
    /// let dest = scale.to_destination(U256::from(1_500_000_000_000_000_000u128)).unwrap();
    /// assert_eq!(dest, 150_000_000);
    /// ```
    pub fn to_destination(&self, amount: U256) -> Result<u64> {
        let scaled = if self.source_decimals >= self.destination_decimals {
            let shift = self.source_decimals - self.destination_decimals;
            amount / pow10(shift)
        } else {
            let shift = self.destination_decimals - self.source_decimals;
            amount
                .checked_mul(pow10(shift))
                .ok_or_else(|| CoreError::AmountOverflow(amount.to_string()))?
        };

        if scaled.is_zero() {
            return Err(CoreError::AmountTooSmall(amount.to_string()));
        }
        u64::try_from(scaled).map_err(|_| CoreError::AmountOverflow(amount.to_string()))
    }
}

impl Default for AmountScale {
    fn default() -> Self {
        Self {
            source_decimals: DEFAULT_SOURCE_DECIMALS,
            destination_decimals: DEFAULT_DESTINATION_DECIMALS,
        }
    }
}

fn pow10(exp: u8) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}
