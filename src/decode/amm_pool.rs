//! AMM pool/global-config account decoder and Buy/Sell trade-event decoder
//! (spec §4.4).

use crate::constants::layout::amm_pool as layout;
use crate::decode::events::{read_pubkey, read_u64_le, RawTradeFields};
use crate::error::CoreError;
use solana_sdk::pubkey::Pubkey;

pub const BUY_EVENT_DISCRIMINATOR: [u8; 8] = [0x22, 0x3c, 0x76, 0x11, 0x8a, 0x5d, 0x4e, 0x93];
pub const SELL_EVENT_DISCRIMINATOR: [u8; 8] = [0xd6, 0x9a, 0x2c, 0x55, 0x07, 0x14, 0x6b, 0x08];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmAccountKind {
    Pool,
    GlobalConfig,
}

fn discriminator_u64(data: &[u8]) -> Result<u64, CoreError> {
    let bytes: [u8; 8] =
        data.get(0..8).and_then(|s| s.try_into().ok()).ok_or(CoreError::DecodeShort { needed: 8, got: data.len() })?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn classify(data: &[u8]) -> Result<AmmAccountKind, CoreError> {
    match discriminator_u64(data)? {
        d if d == layout::POOL_DISCRIMINATOR => Ok(AmmAccountKind::Pool),
        d if d == layout::GLOBAL_CONFIG_DISCRIMINATOR => Ok(AmmAccountKind::GlobalConfig),
        other => Err(CoreError::DecodeDiscriminatorUnknown {
            venue: "amm_pool",
            discriminator: other.to_le_bytes(),
        }),
    }
}

/// Direct decode of a pool account's binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStateSnapshot {
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub pool_authority: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_reserves: u64,
    pub quote_reserves: u64,
    pub lp_fee_bp: u64,
    pub lp_fee: u64,
    pub protocol_fee_bp: u64,
    pub protocol_fee: u64,
    pub disabled: bool,
}

impl PoolStateSnapshot {
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        if data.len() < layout::MIN_LEN {
            return Err(CoreError::DecodeShort { needed: layout::MIN_LEN, got: data.len() });
        }
        Ok(Self {
            base_mint: read_pubkey(data, layout::BASE_MINT)?,
            quote_mint: read_pubkey(data, layout::QUOTE_MINT)?,
            pool_authority: read_pubkey(data, layout::POOL_AUTHORITY)?,
            base_vault: read_pubkey(data, layout::BASE_VAULT)?,
            quote_vault: read_pubkey(data, layout::QUOTE_VAULT)?,
            base_reserves: read_u64_le(data, layout::BASE_RESERVES)?,
            quote_reserves: read_u64_le(data, layout::QUOTE_RESERVES)?,
            lp_fee_bp: read_u64_le(data, layout::LP_FEE_PAIR)?,
            lp_fee: read_u64_le(data, layout::LP_FEE_PAIR + 8)?,
            protocol_fee_bp: read_u64_le(data, layout::PROTOCOL_FEE_PAIR)?,
            protocol_fee: read_u64_le(data, layout::PROTOCOL_FEE_PAIR + 8)?,
            disabled: data[layout::DISABLE_FLAGS] != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmmTradeEvent {
    pub direction: TradeDirection,
    pub fields: RawTradeFields,
}

impl AmmTradeEvent {
    pub fn decode(program_data: &[u8]) -> Result<Self, CoreError> {
        let discriminator = RawTradeFields::discriminator(program_data)?;
        let direction = if discriminator == BUY_EVENT_DISCRIMINATOR {
            TradeDirection::Buy
        } else if discriminator == SELL_EVENT_DISCRIMINATOR {
            TradeDirection::Sell
        } else {
            return Err(CoreError::DecodeDiscriminatorUnknown { venue: "amm_pool", discriminator });
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

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_fixture() -> Vec<u8> {
        let mut buf = vec![0u8; layout::MIN_LEN];
        buf[0..8].copy_from_slice(&layout::POOL_DISCRIMINATOR.to_le_bytes());
        buf[layout::BASE_RESERVES..layout::BASE_RESERVES + 8]
            .copy_from_slice(&700_000_000_000_000u64.to_le_bytes());
        buf[layout::QUOTE_RESERVES..layout::QUOTE_RESERVES + 8]
            .copy_from_slice(&42_000_000_000u64.to_le_bytes());
        buf
    }

    #[test]
    fn classifies_pool_vs_global_config() {
        let pool = pool_fixture();
        assert_eq!(classify(&pool).unwrap(), AmmAccountKind::Pool);

        let mut cfg = vec![0u8; 8];
        cfg[0..8].copy_from_slice(&layout::GLOBAL_CONFIG_DISCRIMINATOR.to_le_bytes());
        assert_eq!(classify(&cfg).unwrap(), AmmAccountKind::GlobalConfig);
    }

    #[test]
    fn decodes_pool_reserves() {
        let buf = pool_fixture();
        let snapshot = PoolStateSnapshot::decode(&buf).unwrap();
        assert_eq!(snapshot.base_reserves, 700_000_000_000_000);
        assert_eq!(snapshot.quote_reserves, 42_000_000_000);
        assert!(!snapshot.disabled);
    }

    #[test]
    fn short_pool_payload_fails() {
        let buf = vec![0u8; layout::MIN_LEN - 1];
        let err = PoolStateSnapshot::decode(&buf).unwrap_err();
        assert!(matches!(err, CoreError::DecodeShort { .. }));
    }
}
