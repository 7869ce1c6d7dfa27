//! Periodic reconciliation sweep (spec §4.6): promotes `BondingCurveComplete`
//! tokens that already have AMM evidence on record but have not yet been
//! formally confirmed graduated, and runs forever as its own cooperative
//! task rather than a one-shot check (SPEC_FULL §10).

use super::state::TokenState;
use super::LifecycleEngine;
use crate::eventbus::Event;
use crate::storage::StorageBackend;
use std::sync::Arc;
use std::time::Duration;

/// Scan tracked tokens once and promote any `BondingCurveComplete` token
/// that is past the reconciliation window. The live engine already
/// promotes inline whenever AMM evidence reaches it directly; this sweep
/// exists for the case where that never happens (a restart, or a
/// gap-recovery backfill that wrote straight to storage) and the earliest
/// AMM evidence has to be read back from the durable store (spec §4.6).
/// Returns the graduation events fired.
pub async fn sweep_once<B: StorageBackend>(engine: &LifecycleEngine, storage: &B, now_slot: u64) -> Vec<Event> {
    let window = engine.config().reconciliation_window_slots;
    let mut events = Vec::new();
    for token in engine.tokens_in_state(TokenState::BondingCurveComplete) {
        let Some(complete_slot) = token.bonding_curve_complete_at_slot else { continue };
        if now_slot.saturating_sub(complete_slot) < window {
            continue;
        }
        let evidence_slot = match token.amm_evidence_slot {
            Some(slot) => Some(slot),
            None => match storage.earliest_amm_evidence_slot(&token.mint).await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::warn!(error = %e, mint = %token.mint, "reconciliation storage lookup failed");
                    None
                }
            },
        };
        let Some(evidence_slot) = evidence_slot else { continue };
        if let Some(event) = engine.promote_to_graduated(&token.mint, evidence_slot) {
            events.push(event);
        }
    }
    for event in &events {
        engine.event_bus().publish(event.clone());
    }
    events
}

/// Run the sweep on a fixed interval until `shutdown` fires, tracking the
/// highest slot observed externally via `current_slot`.
pub async fn run<B: StorageBackend>(
    engine: Arc<LifecycleEngine>,
    storage: Arc<B>,
    current_slot: impl Fn() -> u64 + Send + 'static,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let slot = current_slot();
                let promoted = sweep_once(&engine, storage.as_ref(), slot).await;
                if !promoted.is_empty() {
                    tracing::info!(count = promoted.len(), "reconciliation sweep promoted tokens");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Direction, Venue};
    use crate::error::CoreError;
    use crate::eventbus::EventBus;
    use crate::lifecycle::{LifecycleConfig, TradeInput};
    use crate::pricing::PriceSignals;
    use crate::storage::models::{DowntimeGapRow, SolQuoteRow, StateSnapshotRow, TokenRow, TradeRow};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use solana_sdk::pubkey::Pubkey;

    /// A storage double reporting a fixed answer to the one query the
    /// sweep needs; every other method is unreachable from these tests.
    struct FixedEvidenceStorage {
        evidence_slot: Option<u64>,
    }

    #[async_trait::async_trait]
    impl StorageBackend for FixedEvidenceStorage {
        async fn upsert_token(&self, _row: TokenRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn insert_trade(&self, _row: TradeRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn insert_state_snapshot(&self, _row: StateSnapshotRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn record_sol_quote(&self, _row: SolQuoteRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn record_downtime_gap(&self, _row: DowntimeGapRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn earliest_amm_evidence_slot(&self, _mint: &Pubkey) -> Result<Option<u64>, CoreError> {
            Ok(self.evidence_slot)
        }
    }

    fn engine_with_window(window_slots: u64) -> LifecycleEngine {
        let mut config = LifecycleConfig::default();
        config.reconciliation_window_slots = window_slots;
        LifecycleEngine::new(config, EventBus::new())
    }

    fn trade(mint: Pubkey, slot: u64, venue: Venue) -> TradeInput {
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
            price: PriceSignals { price_sol: Decimal::ONE, price_usd: Decimal::ONE, market_cap_usd: Decimal::from(9_000) },
            bonding_curve_progress: Some(Decimal::from(100)),
        }
    }

    #[tokio::test]
    async fn amm_signal_already_promotes_inline_so_sweep_finds_nothing_left_to_do() {
        // ingest_amm_pool_account/ingest_trade promote on the spot whenever
        // they observe AMM evidence directly; the sweep only ever has work
        // left when a token reached BondingCurveComplete without any AMM
        // signal reaching the live engine at all.
        let engine = engine_with_window(10);
        let mint = Pubkey::new_unique();
        engine.ingest_trade(trade(mint, 1, Venue::BondingCurve));
        engine.ingest_bonding_curve_account(mint, 2, 84_000_000_000, 1, true, Decimal::from(100));
        engine.ingest_amm_pool_account(mint, 3, 1, 1);

        let storage = FixedEvidenceStorage { evidence_slot: None };
        let events = sweep_once(&engine, &storage, 100).await;
        assert!(events.is_empty(), "already graduated inline, nothing left for the sweep");
    }

    #[tokio::test]
    async fn does_not_promote_within_window() {
        let engine = engine_with_window(1_000);
        let mint = Pubkey::new_unique();
        engine.ingest_trade(trade(mint, 1, Venue::BondingCurve));
        engine.ingest_bonding_curve_account(mint, 2, 84_000_000_000, 1, true, Decimal::from(100));

        let storage = FixedEvidenceStorage { evidence_slot: Some(2) };
        let events = sweep_once(&engine, &storage, 5).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn promotes_from_storage_evidence_when_engine_never_saw_it_live() {
        // Simulates a restart: the live engine only knows the token reached
        // BondingCurveComplete, never the AMM confirmation, but storage has
        // since recorded AMM evidence (e.g. via gap-recovery backfill).
        let engine = engine_with_window(10);
        let mint = Pubkey::new_unique();
        engine.ingest_trade(trade(mint, 1, Venue::BondingCurve));
        engine.ingest_bonding_curve_account(mint, 2, 84_000_000_000, 1, true, Decimal::from(100));

        let storage = FixedEvidenceStorage { evidence_slot: Some(7) };
        let events = sweep_once(&engine, &storage, 100).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Graduation { .. }));
    }
}
