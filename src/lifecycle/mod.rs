//! The per-token state machine, graduation detection and admission-threshold
//! holding (spec §4.6). Owns the in-memory authoritative Token map; every
//! other component reads through [`LifecycleEngine`] or receives snapshots
//! via the [`crate::eventbus::EventBus`] (spec §3 Ownership, §5 Shared
//! resources).

pub mod reconciliation;
pub mod state;

use crate::decode::{Direction, Venue};
use crate::eventbus::{Event, EventBus};
use chrono::{DateTime, Utc};
use clru::CLruCache;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use state::{Token, TokenState, Trade};
use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub threshold_usd_bc: Decimal,
    pub threshold_usd_amm: Decimal,
    /// Number of distinct mints the pending (below-threshold) LRU holds at
    /// once; a mint evicted here is discarded along with its held trades.
    pub pending_lru_capacity: NonZeroUsize,
    /// Slots a token may remain `BondingCurveComplete` with known AMM
    /// evidence before the reconciliation sweep promotes it anyway.
    pub reconciliation_window_slots: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            threshold_usd_bc: Decimal::from(8_888),
            threshold_usd_amm: Decimal::from(1_000),
            pending_lru_capacity: NonZeroUsize::new(10_000).expect("nonzero literal"),
            reconciliation_window_slots: 9_000, // ~1 hour at ~2.5 slots/sec
        }
    }
}

/// One decoded, priced trade ready for lifecycle processing. Produced by
/// `PriceCalculator` + the venue decoders, consumed here.
#[derive(Debug, Clone)]
pub struct TradeInput {
    pub mint: Pubkey,
    pub venue: Venue,
    pub direction: Direction,
    pub trader: Option<Pubkey>,
    pub signature: String,
    pub intra_tx_index: u32,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub price: crate::pricing::PriceSignals,
    pub bonding_curve_progress: Option<Decimal>,
}

pub struct LifecycleEngine {
    tokens: DashMap<Pubkey, Token>,
    pending: Mutex<CLruCache<Pubkey, Vec<TradeInput>>>,
    config: LifecycleConfig,
    event_bus: EventBus,
}

impl LifecycleEngine {
    pub fn new(config: LifecycleConfig, event_bus: EventBus) -> Self {
        let pending = Mutex::new(CLruCache::new(config.pending_lru_capacity));
        Self { tokens: DashMap::new(), pending, config, event_bus }
    }

    fn admission_threshold(&self, venue: Venue) -> Decimal {
        match venue {
            Venue::BondingCurve => self.config.threshold_usd_bc,
            Venue::AmmPool => self.config.threshold_usd_amm,
        }
    }

    fn push_pending(&self, mint: Pubkey, input: TradeInput) {
        let mut guard = self.pending.lock();
        if let Some(existing) = guard.get_mut(&mint) {
            existing.push(input);
        } else {
            guard.put(mint, vec![input]);
        }
    }

    fn take_pending(&self, mint: &Pubkey) -> Vec<TradeInput> {
        let mut guard = self.pending.lock();
        guard.pop(mint).unwrap_or_default()
    }

    /// Apply one trade's numeric effects to an already-admitted token,
    /// returning the durable `Trade` row and whether this call just
    /// confirmed graduation (spec §4.6 transitions and tie-break rule).
    fn apply_trade(token: &mut Token, input: &TradeInput) -> (Trade, bool) {
        let accepts = token.accepts_slot(input.slot);
        if accepts {
            // Same-slot tie-break: an AMM trade always wins "current venue"
            // over a BC trade in the same slot; a later slot always wins.
            if input.slot > token.latest_update_slot || input.venue == Venue::AmmPool {
                token.current_venue = input.venue;
            }
            token.latest_update_slot = input.slot;
            token.latest_price_sol = input.price.price_sol;
            token.latest_price_usd = input.price.price_usd;
            token.latest_market_cap_usd = input.price.market_cap_usd;
            token.latest_virtual_sol_reserves = input.virtual_sol_reserves;
            token.latest_virtual_token_reserves = input.virtual_token_reserves;
            if let Some(progress) = input.bonding_curve_progress {
                token.latest_bonding_curve_progress = progress;
            }
        }
        token.trade_count += 1;

        let mut graduation_confirmed = false;
        if input.venue == Venue::AmmPool {
            token.amm_evidence_slot = Some(token.amm_evidence_slot.map_or(input.slot, |s| s.min(input.slot)));
            if !token.graduated_to_amm {
                token.graduated_to_amm = true;
                token.graduation_slot = Some(input.slot);
                token.state = TokenState::Graduated;
                token.current_venue = Venue::AmmPool;
                graduation_confirmed = true;
            }
        }

        let trade = Trade {
            signature: input.signature.clone(),
            intra_tx_index: input.intra_tx_index,
            mint: input.mint,
            venue: input.venue,
            direction: input.direction,
            trader: input.trader,
            sol_amount: input.sol_amount,
            token_amount: input.token_amount,
            price_sol: input.price.price_sol,
            price_usd: input.price.price_usd,
            market_cap_usd: input.price.market_cap_usd,
            virtual_sol_reserves: input.virtual_sol_reserves,
            virtual_token_reserves: input.virtual_token_reserves,
            bonding_curve_progress: input.bonding_curve_progress,
            slot: input.slot,
            block_time: input.block_time,
        };
        (trade, graduation_confirmed)
    }

    /// Ingest one decoded, priced trade. Creates the token on first
    /// admission-threshold crossing (flushing any trades held below
    /// threshold in arrival order), otherwise updates an existing token or
    /// holds the trade in the pending LRU (spec §4.6 Admission threshold).
    pub fn ingest_trade(&self, input: TradeInput) -> Vec<Event> {
        let mut events = Vec::new();

        if let Some(mut token) = self.tokens.get_mut(&input.mint) {
            let (trade, graduated) = Self::apply_trade(&mut token, &input);
            if graduated {
                events.push(Event::Graduation { mint: input.mint, slot: input.slot });
            }
            events.push(Event::Trade(trade));
        } else {
            let threshold = self.admission_threshold(input.venue);
            if input.price.market_cap_usd >= threshold {
                let initial_state =
                    if input.venue == Venue::AmmPool { TokenState::Graduated } else { TokenState::BondingCurve };
                let mut token =
                    Token::new_first_seen(input.mint, input.slot, input.block_time, input.venue, initial_state);
                token.threshold_crossed_at = Some(input.block_time);
                token.threshold_crossed_price_usd = Some(input.price.price_usd);
                events.push(Event::NewToken(token.clone()));

                let pending = self.take_pending(&input.mint);
                for queued in pending.into_iter().chain(std::iter::once(input)) {
                    let (trade, graduated) = Self::apply_trade(&mut token, &queued);
                    if graduated {
                        events.push(Event::Graduation { mint: trade.mint, slot: trade.slot });
                    }
                    events.push(Event::Trade(trade));
                }
                self.tokens.insert(token.mint, token);
            } else {
                self.push_pending(input.mint, input);
            }
        }

        for event in &events {
            self.event_bus.publish(event.clone());
        }
        events
    }

    /// Apply a bonding-curve account snapshot to an already-tracked token:
    /// reserves, progress and the `complete` flag (spec §4.6 BC→BC and
    /// BC→BondingCurveComplete transitions). Snapshots for untracked mints
    /// are ignored — a Token is only created on a priced trade crossing the
    /// admission threshold (spec §3 Lifecycle).
    pub fn ingest_bonding_curve_account(
        &self,
        mint: Pubkey,
        slot: u64,
        virtual_sol_reserves: u64,
        virtual_token_reserves: u64,
        complete: bool,
        progress: Decimal,
    ) {
        if let Some(mut token) = self.tokens.get_mut(&mint) {
            if token.accepts_slot(slot) {
                token.latest_update_slot = slot;
                token.latest_virtual_sol_reserves = virtual_sol_reserves;
                token.latest_virtual_token_reserves = virtual_token_reserves;
                token.latest_bonding_curve_progress = progress;
            }
            if complete && token.state == TokenState::BondingCurve {
                token.state = TokenState::BondingCurveComplete;
                token.bonding_curve_complete_at_slot = Some(slot);
            }
        }
    }

    /// Apply an AMM pool account snapshot. Per the Open Question resolution
    /// in DESIGN.md, a pool-creation update alone with non-zero reserves is
    /// sufficient to confirm graduation for an already-tracked mint.
    pub fn ingest_amm_pool_account(
        &self,
        mint: Pubkey,
        slot: u64,
        base_reserves: u64,
        quote_reserves: u64,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        if base_reserves == 0 || quote_reserves == 0 {
            return events;
        }
        if let Some(mut token) = self.tokens.get_mut(&mint) {
            if token.accepts_slot(slot) {
                token.amm_evidence_slot = Some(token.amm_evidence_slot.map_or(slot, |s| s.min(slot)));
            }
            if !token.graduated_to_amm {
                token.graduated_to_amm = true;
                token.graduation_slot = Some(slot);
                token.state = TokenState::Graduated;
                token.current_venue = Venue::AmmPool;
                events.push(Event::Graduation { mint, slot });
            }
        }
        for event in &events {
            self.event_bus.publish(event.clone());
        }
        events
    }

    pub fn get(&self, mint: &Pubkey) -> Option<Token> {
        self.tokens.get(mint).map(|entry| entry.clone())
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub(crate) fn tokens_in_state(&self, state: TokenState) -> Vec<Token> {
        self.tokens.iter().filter(|e| e.state == state).map(|e| e.clone()).collect()
    }

    pub(crate) fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub(crate) fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub(crate) fn promote_to_graduated(&self, mint: &Pubkey, slot: u64) -> Option<Event> {
        let mut token = self.tokens.get_mut(mint)?;
        if token.graduated_to_amm {
            return None;
        }
        token.graduated_to_amm = true;
        token.graduation_slot = Some(slot);
        token.state = TokenState::Graduated;
        token.current_venue = Venue::AmmPool;
        Some(Event::Graduation { mint: *mint, slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceSignals;

    fn engine() -> LifecycleEngine {
        LifecycleEngine::new(LifecycleConfig::default(), EventBus::new())
    }

    fn signals(market_cap: i64) -> PriceSignals {
        PriceSignals {
            price_sol: Decimal::new(1, 6),
            price_usd: Decimal::new(1, 4),
            market_cap_usd: Decimal::from(market_cap),
        }
    }

    fn base_input(mint: Pubkey, slot: u64, market_cap: i64, venue: Venue) -> TradeInput {
        TradeInput {
            mint,
            venue,
            direction: Direction::Buy,
            trader: None,
            signature: format!("sig-{slot}"),
            intra_tx_index: 0,
            slot,
            block_time: Utc::now(),
            sol_amount: 1,
            token_amount: 1,
            virtual_sol_reserves: 1,
            virtual_token_reserves: 1,
            price: signals(market_cap),
            bonding_curve_progress: Some(Decimal::from(10)),
        }
    }

    #[test]
    fn scenario_one_below_threshold_holds_trade() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        let events = engine.ingest_trade(base_input(mint, 1, 5_000, Venue::BondingCurve));
        assert!(events.is_empty());
        assert!(engine.get(&mint).is_none());
    }

    #[test]
    fn scenario_two_crossing_threshold_flushes_pending() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 1, 5_000, Venue::BondingCurve));
        let events = engine.ingest_trade(base_input(mint, 2, 9_000, Venue::BondingCurve));

        let token = engine.get(&mint).unwrap();
        assert!(token.threshold_crossed_at.is_some());
        assert_eq!(token.trade_count, 2);

        let trade_events: Vec<_> =
            events.iter().filter(|e| matches!(e, Event::Trade(_))).collect();
        assert_eq!(trade_events.len(), 2, "both the held and crossing trade must be persisted");
    }

    #[test]
    fn amm_trade_confirms_graduation_once() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 1, 9_000, Venue::BondingCurve));
        engine.ingest_bonding_curve_account(mint, 2, 84_000_000_000, 1, true, Decimal::from(100));
        assert_eq!(engine.get(&mint).unwrap().state, TokenState::BondingCurveComplete);

        let events = engine.ingest_trade(base_input(mint, 3, 9_000, Venue::AmmPool));
        assert!(events.iter().any(|e| matches!(e, Event::Graduation { .. })));
        let token = engine.get(&mint).unwrap();
        assert!(token.graduated_to_amm);
        assert_eq!(token.current_venue, Venue::AmmPool);
        assert_eq!(token.graduation_slot, Some(3));

        let events_again = engine.ingest_trade(base_input(mint, 4, 9_000, Venue::AmmPool));
        assert!(
            !events_again.iter().any(|e| matches!(e, Event::Graduation { .. })),
            "graduation must fire at most once"
        );
    }

    #[test]
    fn same_slot_amm_wins_current_venue_both_trades_kept() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 1, 9_000, Venue::BondingCurve));
        engine.ingest_trade(base_input(mint, 5, 9_000, Venue::BondingCurve));
        let events = engine.ingest_trade(base_input(mint, 5, 9_000, Venue::AmmPool));
        let token = engine.get(&mint).unwrap();
        assert_eq!(token.current_venue, Venue::AmmPool);
        assert_eq!(token.trade_count, 3, "both same-slot trades are preserved");
        assert!(events.iter().any(|e| matches!(e, Event::Trade(_))));
    }

    #[test]
    fn stale_slot_does_not_rewrite_latest_fields_but_trade_is_recorded() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 10, 9_000, Venue::BondingCurve));
        let before = engine.get(&mint).unwrap();

        let events = engine.ingest_trade(base_input(mint, 3, 9_000, Venue::BondingCurve));
        let after = engine.get(&mint).unwrap();
        assert_eq!(after.latest_update_slot, before.latest_update_slot);
        assert_eq!(after.trade_count, before.trade_count + 1);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Trade(_)));
    }

    #[test]
    fn unknown_mint_amm_trade_creates_graduated_token() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 1, 2_000, Venue::AmmPool));
        let token = engine.get(&mint).unwrap();
        assert_eq!(token.state, TokenState::Graduated);
        assert!(token.graduated_to_amm);
    }

    #[test]
    fn pool_account_alone_confirms_graduation_with_nonzero_reserves() {
        let engine = engine();
        let mint = Pubkey::new_unique();
        engine.ingest_trade(base_input(mint, 1, 9_000, Venue::BondingCurve));
        engine.ingest_bonding_curve_account(mint, 2, 84_000_000_000, 1, true, Decimal::from(100));

        let events = engine.ingest_amm_pool_account(mint, 3, 1, 1);
        assert!(events.iter().any(|e| matches!(e, Event::Graduation { .. })));

        let zero_reserve_events = engine.ingest_amm_pool_account(Pubkey::new_unique(), 1, 0, 0);
        assert!(zero_reserve_events.is_empty());
    }
}
