//! Bonding-curve account decoder and Buy/Sell trade-event decoder (spec §4.4).

use crate::constants::layout::bonding_curve as layout;
use crate::decode::events::{read_pubkey, read_u64_le, RawTradeFields};
use crate::error::CoreError;
use solana_sdk::pubkey::Pubkey;

/// Discriminators for the two program-data event kinds emitted by the
/// bonding-curve program. These are venue-local constants, distinct from the
/// account discriminator range.
pub const BUY_EVENT_DISCRIMINATOR: [u8; 8] = [0x67, 0xf4, 0x52, 0x1f, 0x2d, 0xee, 0x5a, 0x40];
pub const SELL_EVENT_DISCRIMINATOR: [u8; 8] = [0x3e, 0x2f, 0x37, 0x0a, 0xf4, 0x07, 0xa5, 0x4b];

/// Direct decode of a bonding-curve account's binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondingCurveSnapshot {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: Pubkey,
    pub mint: Pubkey,
}

impl BondingCurveSnapshot {
    /// Trailing bytes beyond [`layout::MIN_LEN`] are ignored; a shorter
    /// payload fails with [`CoreError::DecodeShort`].
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        if data.len() < layout::MIN_LEN {
            return Err(CoreError::DecodeShort { needed: layout::MIN_LEN, got: data.len() });
        }
        Ok(Self {
            virtual_token_reserves: read_u64_le(data, layout::VIRTUAL_TOKEN_RESERVES)?,
            virtual_sol_reserves: read_u64_le(data, layout::VIRTUAL_SOL_RESERVES)?,
            real_token_reserves: read_u64_le(data, layout::REAL_TOKEN_RESERVES)?,
            real_sol_reserves: read_u64_le(data, layout::REAL_SOL_RESERVES)?,
            token_total_supply: read_u64_le(data, layout::TOKEN_TOTAL_SUPPLY)?,
            complete: data[layout::COMPLETE_FLAG] != 0,
            creator: read_pubkey(data, layout::CREATOR)?,
            mint: read_pubkey(data, layout::MINT)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// A decoded Buy or Sell event from the bonding-curve venue's program-data
/// log emissions. Reserves here are the *post-trade* virtual reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondingCurveTradeEvent {
    pub direction: TradeDirection,
    pub fields: RawTradeFields,
}

impl BondingCurveTradeEvent {
    pub fn decode(program_data: &[u8]) -> Result<Self, CoreError> {
        let discriminator = RawTradeFields::discriminator(program_data)?;
        let direction = if discriminator == BUY_EVENT_DISCRIMINATOR {
            TradeDirection::Buy
        } else if discriminator == SELL_EVENT_DISCRIMINATOR {
            TradeDirection::Sell
        } else {
            return Err(CoreError::DecodeDiscriminatorUnknown { venue: "bonding_curve", discriminator });
        };
        let fields = RawTradeFields::decode(program_data)?;
        Ok(Self { direction, fields })
    }

    pub fn sol_amount(&self) -> u64 {
        self.fields.user_quote_amount
    }

    pub fn token_amount(&self) -> u64 {
        self.fields.base_amount
    }

    pub fn post_trade_virtual_sol_reserves(&self) -> u64 {
        self.fields.pool_quote_reserves
    }

    pub fn post_trade_virtual_token_reserves(&self) -> u64 {
        self.fields.pool_base_reserves
    }
}
