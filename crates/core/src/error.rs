//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unrecognised event type tag.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Event argument missing at the expected position.
    #[error("Missing event argument {index} ({name})")]
    MissingArgument {
        /// Position in the argument list.
        index: usize,
        /// Human-readable argument name.
        name: &'static str,
    },

    /// Event argument present but not parseable.
    #[error("Invalid event argument {index} ({name}): {reason}")]
    InvalidArgument {
        /// Position in the argument list.
        index: usize,
        /// Human-readable argument name.
        name: &'static str,
        /// Parse failure detail.
        reason: String,
    },

    /// Amount scaled down to zero destination units.
    #[error("Amount {0} is below one destination unit")]
    AmountTooSmall(String),

    /// Amount does not fit the destination chain's u64 amount field.
    #[error("Amount {0} overflows destination amount range")]
    AmountOverflow(String),

    /// Decimal configuration out of range.
    #[error("Invalid decimals: {0} (must be <= 36)")]
    InvalidDecimals(u8),

    /// Invalid address format.
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
