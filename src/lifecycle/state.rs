//! Token and Trade entities and the per-token state machine (spec §3, §4.6).

use crate::decode::{Direction, Venue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    BondingCurve,
    BondingCurveComplete,
    Graduated,
}

/// Optional enrichment attached asynchronously by a collaborator out of
/// this core's scope (spec §3 Token attributes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub creator: Option<Pubkey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub mint: Pubkey,
    pub first_seen_slot: u64,
    pub first_seen_at: DateTime<Utc>,
    pub first_seen_venue: Venue,
    pub threshold_crossed_at: Option<DateTime<Utc>>,
    pub threshold_crossed_price_usd: Option<Decimal>,
    pub current_venue: Venue,
    pub state: TokenState,
    pub graduated_to_amm: bool,
    pub graduation_slot: Option<u64>,
    pub trade_count: u64,
    pub latest_price_sol: Decimal,
    pub latest_price_usd: Decimal,
    pub latest_market_cap_usd: Decimal,
    pub latest_virtual_sol_reserves: u64,
    pub latest_virtual_token_reserves: u64,
    pub latest_bonding_curve_progress: Decimal,
    pub latest_update_slot: u64,
    pub metadata: Option<TokenMetadata>,
    /// Earliest slot at which any AMM-venue signal (trade or pool account)
    /// was observed for this mint, even before graduation is confirmed.
    /// Feeds the reconciliation sweep (spec §4.6).
    pub amm_evidence_slot: Option<u64>,
    /// Slot at which this token's bonding-curve `complete` flag was first
    /// observed true, used to age a stuck `BondingCurveComplete` token out
    /// to the reconciliation sweep.
    pub bonding_curve_complete_at_slot: Option<u64>,
}

impl Token {
    /// Construct a brand-new Token on first observation, per the
    /// *Unseen → any* transition (spec §4.6).
    pub fn new_first_seen(
        mint: Pubkey,
        slot: u64,
        at: DateTime<Utc>,
        venue: Venue,
        state: TokenState,
    ) -> Self {
        Self {
            mint,
            first_seen_slot: slot,
            first_seen_at: at,
            first_seen_venue: venue,
            threshold_crossed_at: None,
            threshold_crossed_price_usd: None,
            current_venue: venue,
            state,
            graduated_to_amm: matches!(state, TokenState::Graduated),
            graduation_slot: if matches!(state, TokenState::Graduated) { Some(slot) } else { None },
            trade_count: 0,
            latest_price_sol: Decimal::ZERO,
            latest_price_usd: Decimal::ZERO,
            latest_market_cap_usd: Decimal::ZERO,
            latest_virtual_sol_reserves: 0,
            latest_virtual_token_reserves: 0,
            latest_bonding_curve_progress: Decimal::ZERO,
            latest_update_slot: slot,
            metadata: None,
            amm_evidence_slot: if matches!(state, TokenState::Graduated) { Some(slot) } else { None },
            bonding_curve_complete_at_slot: None,
        }
    }

    /// Whether `incoming_slot` is new enough to update `latest_*` fields
    /// (spec §4.7 monotonic-by-slot rule).
    pub fn accepts_slot(&self, incoming_slot: u64) -> bool {
        incoming_slot >= self.latest_update_slot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub signature: String,
    pub intra_tx_index: u32,
    pub mint: Pubkey,
    pub venue: Venue,
    pub direction: Direction,
    pub trader: Option<Pubkey>,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub price_sol: Decimal,
    pub price_usd: Decimal,
    pub market_cap_usd: Decimal,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub bonding_curve_progress: Option<Decimal>,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
}
