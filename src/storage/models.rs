//! Row shapes for the persisted store. These are plain data; encoding
//! to/from SQL lives in `storage::mod`'s query functions, kept close to the
//! query site rather than spread across `From` impls on the row types.

use crate::decode::{Direction, Venue};
use crate::lifecycle::state::{Token, Trade, TokenState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;

/// Venue/direction are stored as their string encodings at this boundary
/// only (spec §9 Design Notes).
pub fn venue_to_sql(venue: Venue) -> &'static str {
    venue.as_str()
}

pub fn direction_to_sql(direction: Direction) -> &'static str {
    direction.as_str()
}

pub fn token_state_to_sql(state: TokenState) -> &'static str {
    match state {
        TokenState::BondingCurve => "bonding_curve",
        TokenState::BondingCurveComplete => "bonding_curve_complete",
        TokenState::Graduated => "graduated",
    }
}

#[derive(Debug, Clone)]
pub struct TokenRow {
    pub mint: String,
    pub first_seen_slot: i64,
    pub first_seen_at: DateTime<Utc>,
    pub first_seen_venue: String,
    pub threshold_crossed_at: Option<DateTime<Utc>>,
    pub threshold_crossed_price_usd: Option<Decimal>,
    pub current_venue: String,
    pub state: String,
    pub graduated_to_amm: bool,
    pub graduation_slot: Option<i64>,
    pub trade_count: i64,
    pub latest_price_sol: Decimal,
    pub latest_price_usd: Decimal,
    pub latest_market_cap_usd: Decimal,
    pub latest_virtual_sol_reserves: i64,
    pub latest_virtual_token_reserves: i64,
    pub latest_bonding_curve_progress: Decimal,
    pub latest_update_slot: i64,
}

impl From<&Token> for TokenRow {
    fn from(token: &Token) -> Self {
        Self {
            mint: token.mint.to_string(),
            first_seen_slot: token.first_seen_slot as i64,
            first_seen_at: token.first_seen_at,
            first_seen_venue: venue_to_sql(token.first_seen_venue).to_string(),
            threshold_crossed_at: token.threshold_crossed_at,
            threshold_crossed_price_usd: token.threshold_crossed_price_usd,
            current_venue: venue_to_sql(token.current_venue).to_string(),
            state: token_state_to_sql(token.state).to_string(),
            graduated_to_amm: token.graduated_to_amm,
            graduation_slot: token.graduation_slot.map(|s| s as i64),
            trade_count: token.trade_count as i64,
            latest_price_sol: token.latest_price_sol,
            latest_price_usd: token.latest_price_usd,
            latest_market_cap_usd: token.latest_market_cap_usd,
            latest_virtual_sol_reserves: token.latest_virtual_sol_reserves as i64,
            latest_virtual_token_reserves: token.latest_virtual_token_reserves as i64,
            latest_bonding_curve_progress: token.latest_bonding_curve_progress,
            latest_update_slot: token.latest_update_slot as i64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub signature: String,
    pub intra_tx_index: i32,
    pub mint: String,
    pub venue: String,
    pub direction: String,
    pub trader: Option<String>,
    pub sol_amount: i64,
    pub token_amount: i64,
    pub price_sol: Decimal,
    pub price_usd: Decimal,
    pub market_cap_usd: Decimal,
    pub virtual_sol_reserves: i64,
    pub virtual_token_reserves: i64,
    pub bonding_curve_progress: Option<Decimal>,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
}

impl From<&Trade> for TradeRow {
    fn from(trade: &Trade) -> Self {
        Self {
            signature: trade.signature.clone(),
            intra_tx_index: trade.intra_tx_index as i32,
            mint: trade.mint.to_string(),
            venue: venue_to_sql(trade.venue).to_string(),
            direction: direction_to_sql(trade.direction).to_string(),
            trader: trade.trader.map(|p| p.to_string()),
            sol_amount: trade.sol_amount as i64,
            token_amount: trade.token_amount as i64,
            price_sol: trade.price_sol,
            price_usd: trade.price_usd,
            market_cap_usd: trade.market_cap_usd,
            virtual_sol_reserves: trade.virtual_sol_reserves as i64,
            virtual_token_reserves: trade.virtual_token_reserves as i64,
            bonding_curve_progress: trade.bonding_curve_progress,
            slot: trade.slot as i64,
            block_time: trade.block_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateSnapshotRow {
    pub mint: String,
    pub venue: String,
    pub virtual_sol_reserves: i64,
    pub virtual_token_reserves: i64,
    pub real_sol_reserves: Option<i64>,
    pub real_token_reserves: Option<i64>,
    pub complete: Option<bool>,
    pub lp_supply: Option<i64>,
    pub slot: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SolQuoteRow {
    pub price_usd: Decimal,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DowntimeGapRow {
    pub start_slot: i64,
    pub end_slot: i64,
    pub duration_secs: i64,
    pub estimated_missed_trades: Option<i64>,
    pub recovery_attempted: bool,
}

pub fn pubkey_from_sql(s: &str) -> Result<Pubkey, crate::error::CoreError> {
    s.parse().map_err(|_| crate::error::CoreError::StoragePermanent(format!("malformed pubkey: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Venue;
    use crate::lifecycle::state::TokenState;

    #[test]
    fn token_row_encodes_string_boundaries() {
        let token = Token::new_first_seen(
            Pubkey::new_unique(),
            1,
            Utc::now(),
            Venue::BondingCurve,
            TokenState::BondingCurve,
        );
        let row = TokenRow::from(&token);
        assert_eq!(row.first_seen_venue, "bonding_curve");
        assert_eq!(row.state, "bonding_curve");
    }
}
