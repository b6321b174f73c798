//! Protocol constants shared by the relayer and the API.

/// Decimals of the presale token on the source chain.
pub const DEFAULT_SOURCE_DECIMALS: u8 = 18;

/// Decimals of the mirrored token on the destination chain.
pub const DEFAULT_DESTINATION_DECIMALS: u8 = 8;

/// Largest supported decimal count (10^36 still fits comfortably in a U256).
pub const MAX_DECIMALS: u8 = 36;

/// Position of the acting user's address in `TokensBought` / `TokensClaimed` args.
pub const USER_ARG_INDEX: usize = 0;

/// Position of the token amount in `TokensBought` / `TokensClaimed` args.
pub const AMOUNT_ARG_INDEX: usize = 2;

/// Memo action tag for bridge mints.
pub const MEMO_ACTION_MINT: &str = "mint";

/// Memo action tag for bridge burns.
pub const MEMO_ACTION_BURN: &str = "burn";
