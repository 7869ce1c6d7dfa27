//! Program identifiers and binary-layout constants, literal per spec §6.

use solana_sdk::{pubkey, pubkey::Pubkey};

/// Bonding-curve launchpad program.
pub const BONDING_CURVE_PROGRAM: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");

/// Graduated AMM program.
pub const AMM_PROGRAM: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");

/// Wrapped SOL mint, used for balance-delta sanity checks.
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

pub mod layout {
    //! Fixed byte offsets for the two account layouts in spec §4.4 / §8.

    /// Bonding-curve account: discriminator[0..8], then five u64 LE fields,
    /// creator pubkey at offset 32, mint pubkey at offset 64, `complete`
    /// flag at offset 221. See DESIGN.md's Open Questions for the
    /// complete-flag offset conflict this resolves.
    pub mod bonding_curve {
        pub const DISCRIMINATOR_RANGE: std::ops::Range<usize> = 0..8;
        pub const VIRTUAL_TOKEN_RESERVES: usize = 8;
        pub const VIRTUAL_SOL_RESERVES: usize = 16;
        pub const REAL_TOKEN_RESERVES: usize = 24;
        pub const REAL_SOL_RESERVES: usize = 32;
        pub const TOKEN_TOTAL_SUPPLY: usize = 40;
        pub const CREATOR: usize = 32;
        pub const CREATOR_LEN: usize = 32;
        pub const MINT: usize = 64;
        pub const MINT_LEN: usize = 32;
        pub const COMPLETE_FLAG: usize = 221;
        /// Minimum payload length: the complete flag is the last fixed field.
        pub const MIN_LEN: usize = COMPLETE_FLAG + 1;
    }

    /// AMM pool / global-config account, selected by an 8-byte discriminator.
    pub mod amm_pool {
        pub const POOL_DISCRIMINATOR: u64 = 0xf19a_6d04_11b1_6dbc;
        pub const GLOBAL_CONFIG_DISCRIMINATOR: u64 = 0x9508_9cca_a0fc_b0d9;

        pub const BASE_MINT: usize = 8;
        pub const QUOTE_MINT: usize = 40;
        pub const POOL_AUTHORITY: usize = 72;
        pub const BASE_VAULT: usize = 104;
        pub const QUOTE_VAULT: usize = 136;
        pub const PUBKEY_LEN: usize = 32;
        pub const BASE_RESERVES: usize = 168;
        pub const QUOTE_RESERVES: usize = 176;
        pub const LP_FEE_PAIR: usize = 184;
        pub const PROTOCOL_FEE_PAIR: usize = 200;
        pub const DISABLE_FLAGS: usize = 216;
        /// Minimum payload length: the disable-flags byte immediately after
        /// the two fee pairs.
        pub const MIN_LEN: usize = DISABLE_FLAGS + 1;
    }
}

pub mod decimals {
    /// SOL has 9 decimal places (lamports).
    pub const SOL: u32 = 9;
    /// Every mint traded in this ecosystem uses 6 decimal places.
    pub const TOKEN: u32 = 6;
}

pub mod economics {
    /// Full bonding-curve supply used as circulating supply for BC market cap.
    pub const BONDING_CURVE_TOTAL_SUPPLY: u64 = 1_000_000_000;
    /// SOL accumulated in the bonding curve at which it completes (migration target).
    pub const MIGRATION_TARGET_SOL: f64 = 84.0;

    /// Default USD market-cap admission threshold, bonding-curve venue.
    pub const DEFAULT_THRESHOLD_USD_BC: f64 = 8_888.0;
    /// Default USD market-cap admission threshold, AMM venue (graduation
    /// itself is already a strong signal, so the bar is lower).
    pub const DEFAULT_THRESHOLD_USD_AMM: f64 = 1_000.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_ids_parse() {
        assert_eq!(BONDING_CURVE_PROGRAM.to_string(), "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
        assert_eq!(AMM_PROGRAM.to_string(), "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
        assert_eq!(WSOL_MINT.to_string(), "So11111111111111111111111111111111111111112");
    }

    #[test]
    fn bonding_curve_min_len() {
        assert_eq!(layout::bonding_curve::MIN_LEN, 222);
    }

    #[test]
    fn bonding_curve_creator_and_mint_match_spec_literals() {
        use layout::bonding_curve::*;
        assert_eq!(CREATOR, 32);
        assert_eq!(MINT, 64);
        assert_eq!(COMPLETE_FLAG, 221);
    }
}
