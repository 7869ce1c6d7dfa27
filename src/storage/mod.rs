//! Batches decoded records and persists them with the upsert/retry/circuit
//! rules of spec §4.7. `StorageBackend` is the seam between the batching
//! policy (tested without a database) and the real `sqlx`-backed store.

pub mod models;

use crate::error::CoreError;
use async_trait::async_trait;
use models::{DowntimeGapRow, SolQuoteRow, StateSnapshotRow, TokenRow, TradeRow};
use solana_sdk::pubkey::Pubkey;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The durable operations the write pipeline issues to storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upsert, never overwriting first-seen fields, monotonic on
    /// `latest_update_slot` (spec §4.7).
    async fn upsert_token(&self, row: TokenRow) -> Result<(), CoreError>;
    /// Insert with deduplication on signature; on conflict do nothing.
    async fn insert_trade(&self, row: TradeRow) -> Result<(), CoreError>;
    async fn insert_state_snapshot(&self, row: StateSnapshotRow) -> Result<(), CoreError>;
    async fn record_sol_quote(&self, row: SolQuoteRow) -> Result<(), CoreError>;
    async fn record_downtime_gap(&self, row: DowntimeGapRow) -> Result<(), CoreError>;
    /// The earliest slot at which AMM evidence (an AMM trade or an AMM pool
    /// account snapshot) for `mint` was durably recorded, if any. Used by
    /// the reconciliation sweep to promote a `BondingCurveComplete` token
    /// whose graduation never reached the live engine directly (spec §4.6).
    async fn earliest_amm_evidence_slot(&self, mint: &Pubkey) -> Result<Option<u64>, CoreError>;
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    async fn upsert_token(&self, row: TokenRow) -> Result<(), CoreError> {
        (**self).upsert_token(row).await
    }
    async fn insert_trade(&self, row: TradeRow) -> Result<(), CoreError> {
        (**self).insert_trade(row).await
    }
    async fn insert_state_snapshot(&self, row: StateSnapshotRow) -> Result<(), CoreError> {
        (**self).insert_state_snapshot(row).await
    }
    async fn record_sol_quote(&self, row: SolQuoteRow) -> Result<(), CoreError> {
        (**self).record_sol_quote(row).await
    }
    async fn record_downtime_gap(&self, row: DowntimeGapRow) -> Result<(), CoreError> {
        (**self).record_downtime_gap(row).await
    }
    async fn earliest_amm_evidence_slot(&self, mint: &Pubkey) -> Result<Option<u64>, CoreError> {
        (**self).earliest_amm_evidence_slot(mint).await
    }
}

/// `sqlx`-backed Postgres implementation. Every query is parameterized;
/// no schema change happens outside `migrations/` (spec §6).
pub struct PostgresBackend {
    pool: sqlx::PgPool,
}

impl PostgresBackend {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::StoragePermanent(e.to_string()))
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn upsert_token(&self, row: TokenRow) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                mint, first_seen_slot, first_seen_at, first_seen_venue,
                threshold_crossed_at, threshold_crossed_price_usd, current_venue, state,
                graduated_to_amm, graduation_slot, trade_count, latest_price_sol,
                latest_price_usd, latest_market_cap_usd, latest_virtual_sol_reserves,
                latest_virtual_token_reserves, latest_bonding_curve_progress, latest_update_slot
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            ON CONFLICT (mint) DO UPDATE SET
                threshold_crossed_at = COALESCE(tokens.threshold_crossed_at, EXCLUDED.threshold_crossed_at),
                threshold_crossed_price_usd =
                    COALESCE(tokens.threshold_crossed_price_usd, EXCLUDED.threshold_crossed_price_usd),
                current_venue = EXCLUDED.current_venue,
                state = EXCLUDED.state,
                graduated_to_amm = EXCLUDED.graduated_to_amm,
                graduation_slot = COALESCE(tokens.graduation_slot, EXCLUDED.graduation_slot),
                trade_count = EXCLUDED.trade_count,
                latest_price_sol = EXCLUDED.latest_price_sol,
                latest_price_usd = EXCLUDED.latest_price_usd,
                latest_market_cap_usd = EXCLUDED.latest_market_cap_usd,
                latest_virtual_sol_reserves = EXCLUDED.latest_virtual_sol_reserves,
                latest_virtual_token_reserves = EXCLUDED.latest_virtual_token_reserves,
                latest_bonding_curve_progress = EXCLUDED.latest_bonding_curve_progress,
                latest_update_slot = EXCLUDED.latest_update_slot
            WHERE EXCLUDED.latest_update_slot >= tokens.latest_update_slot
            "#,
        )
        .bind(&row.mint)
        .bind(row.first_seen_slot)
        .bind(row.first_seen_at)
        .bind(&row.first_seen_venue)
        .bind(row.threshold_crossed_at)
        .bind(row.threshold_crossed_price_usd)
        .bind(&row.current_venue)
        .bind(&row.state)
        .bind(row.graduated_to_amm)
        .bind(row.graduation_slot)
        .bind(row.trade_count)
        .bind(row.latest_price_sol)
        .bind(row.latest_price_usd)
        .bind(row.latest_market_cap_usd)
        .bind(row.latest_virtual_sol_reserves)
        .bind(row.latest_virtual_token_reserves)
        .bind(row.latest_bonding_curve_progress)
        .bind(row.latest_update_slot)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(())
    }

    async fn insert_trade(&self, row: TradeRow) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                signature, intra_tx_index, mint, venue, direction, trader, sol_amount,
                token_amount, price_sol, price_usd, market_cap_usd, virtual_sol_reserves,
                virtual_token_reserves, bonding_curve_progress, slot, block_time
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            ON CONFLICT (signature, venue, direction) DO NOTHING
            "#,
        )
        .bind(&row.signature)
        .bind(row.intra_tx_index)
        .bind(&row.mint)
        .bind(&row.venue)
        .bind(&row.direction)
        .bind(&row.trader)
        .bind(row.sol_amount)
        .bind(row.token_amount)
        .bind(row.price_sol)
        .bind(row.price_usd)
        .bind(row.market_cap_usd)
        .bind(row.virtual_sol_reserves)
        .bind(row.virtual_token_reserves)
        .bind(row.bonding_curve_progress)
        .bind(row.slot)
        .bind(row.block_time)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(())
    }

    async fn insert_state_snapshot(&self, row: StateSnapshotRow) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO state_snapshots (
                mint, venue, virtual_sol_reserves, virtual_token_reserves, real_sol_reserves,
                real_token_reserves, complete, lp_supply, slot, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
        )
        .bind(&row.mint)
        .bind(&row.venue)
        .bind(row.virtual_sol_reserves)
        .bind(row.virtual_token_reserves)
        .bind(row.real_sol_reserves)
        .bind(row.real_token_reserves)
        .bind(row.complete)
        .bind(row.lp_supply)
        .bind(row.slot)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(())
    }

    async fn record_sol_quote(&self, row: SolQuoteRow) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO sol_price_history (price_usd, source, observed_at) VALUES ($1,$2,$3)")
            .bind(row.price_usd)
            .bind(&row.source)
            .bind(row.observed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(())
    }

    async fn record_downtime_gap(&self, row: DowntimeGapRow) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO downtime_periods (start_slot, end_slot, duration_secs, estimated_missed_trades, recovery_attempted)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(row.start_slot)
        .bind(row.end_slot)
        .bind(row.duration_secs)
        .bind(row.estimated_missed_trades)
        .bind(row.recovery_attempted)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(())
    }

    async fn earliest_amm_evidence_slot(&self, mint: &Pubkey) -> Result<Option<u64>, CoreError> {
        let mint = mint.to_string();
        let amm_venue = models::venue_to_sql(crate::decode::Venue::AmmPool);
        let slot: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MIN(slot) FROM (
                SELECT slot FROM trades WHERE mint = $1 AND venue = $2
                UNION ALL
                SELECT slot FROM state_snapshots WHERE mint = $1 AND venue = $2
            ) evidence
            "#,
        )
        .bind(&mint)
        .bind(amm_venue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::StorageTransient(e.to_string()))?;
        Ok(slot.map(|s| s as u64))
    }
}

#[derive(Debug, Clone)]
pub struct WritePipelineConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_budget: u32,
    pub retry_backoff_base: Duration,
    pub failure_queue_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for WritePipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
            retry_budget: 5,
            retry_backoff_base: Duration::from_millis(100),
            failure_queue_capacity: 2_000,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// One queued write, tagged with whether it must trigger an immediate flush
/// (new-token and graduation writes, spec §4.7).
#[derive(Debug, Clone)]
pub enum WriteOp {
    Token(TokenRow, bool),
    Trade(TradeRow, bool),
    StateSnapshot(StateSnapshotRow),
    SolQuote(SolQuoteRow),
    DowntimeGap(DowntimeGapRow),
}

impl WriteOp {
    fn flush_immediately(&self) -> bool {
        match self {
            WriteOp::Token(_, immediate) | WriteOp::Trade(_, immediate) => *immediate,
            _ => false,
        }
    }
}

/// Producer handle. Cloning shares the same bounded channel; the decode-to-
/// write queue never drops (spec §5 Backpressure) — `enqueue` suspends the
/// caller when the channel is full instead.
#[derive(Clone)]
pub struct WritePipeline {
    tx: mpsc::Sender<WriteOp>,
}

impl WritePipeline {
    pub async fn enqueue(&self, op: WriteOp) -> Result<(), CoreError> {
        self.tx.send(op).await.map_err(|_| CoreError::StoragePermanent("write pipeline closed".into()))
    }
}

/// Owns the batching/retry/failure-queue state; runs as its own cooperative
/// task (spec §5 Scheduling model).
pub struct Flusher<B: StorageBackend> {
    backend: B,
    config: WritePipelineConfig,
    rx: mpsc::Receiver<WriteOp>,
    failure_queue: VecDeque<WriteOp>,
}

/// Construct a pipeline/flusher pair. The channel capacity matches the
/// configured batch size so a full buffer reflects one batch's worth of
/// backpressure.
pub fn spawn<B: StorageBackend>(backend: B, config: WritePipelineConfig) -> (WritePipeline, Flusher<B>) {
    let (tx, rx) = mpsc::channel(config.batch_size.max(1));
    (WritePipeline { tx }, Flusher { backend, config: config.clone(), rx, failure_queue: VecDeque::new() })
}

impl<B: StorageBackend> Flusher<B> {
    /// Run until the channel closes, flushing on size, time, or an
    /// immediate-flush op, and draining within `shutdown_grace` when told
    /// to stop (spec §5 Cancellation).
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut batch: Vec<WriteOp> = Vec::with_capacity(self.config.batch_size);
        let mut oldest: Option<Instant> = None;

        loop {
            let timeout = match oldest {
                Some(start) => self.config.flush_interval.saturating_sub(start.elapsed()),
                None => self.config.flush_interval,
            };
            tokio::select! {
                maybe_op = self.rx.recv() => {
                    match maybe_op {
                        Some(op) => {
                            let force = op.flush_immediately();
                            if oldest.is_none() {
                                oldest = Some(Instant::now());
                            }
                            batch.push(op);
                            if force || batch.len() >= self.config.batch_size {
                                self.flush(&mut batch).await;
                                oldest = None;
                            }
                        }
                        None => {
                            self.flush(&mut batch).await;
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                        oldest = None;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let grace = tokio::time::sleep(self.config.shutdown_grace);
                        tokio::pin!(grace);
                        tokio::select! {
                            _ = &mut grace => {}
                            _ = self.drain_remaining(&mut batch) => {}
                        }
                        self.flush(&mut batch).await;
                        for op in batch.drain(..) {
                            self.push_failure(op);
                        }
                        break;
                    }
                }
            }
        }
    }

    async fn drain_remaining(&mut self, batch: &mut Vec<WriteOp>) {
        while let Ok(op) = self.rx.try_recv() {
            batch.push(op);
        }
    }

    async fn flush(&mut self, batch: &mut Vec<WriteOp>) {
        if batch.is_empty() {
            return;
        }
        for op in batch.drain(..) {
            self.write_with_retry(op).await;
        }
        self.update_occupancy_gauge();
    }

    async fn write_with_retry(&mut self, op: WriteOp) {
        let mut attempt = 0;
        loop {
            let result = self.write_once(&op).await;
            match result {
                Ok(()) => return,
                Err(e) if e.is_transient() && attempt < self.config.retry_budget => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff_base * attempt;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "write failed permanently, moving to failure queue");
                    self.push_failure(op);
                    return;
                }
            }
        }
    }

    async fn write_once(&self, op: &WriteOp) -> Result<(), CoreError> {
        match op.clone() {
            WriteOp::Token(row, _) => self.backend.upsert_token(row).await,
            WriteOp::Trade(row, _) => self.backend.insert_trade(row).await,
            WriteOp::StateSnapshot(row) => self.backend.insert_state_snapshot(row).await,
            WriteOp::SolQuote(row) => self.backend.record_sol_quote(row).await,
            WriteOp::DowntimeGap(row) => self.backend.record_downtime_gap(row).await,
        }
    }

    fn push_failure(&mut self, op: WriteOp) {
        if self.failure_queue.len() >= self.config.failure_queue_capacity {
            self.failure_queue.pop_front();
        }
        self.failure_queue.push_back(op);
        self.update_occupancy_gauge();
    }

    fn update_occupancy_gauge(&self) {
        let occupancy = self.failure_queue.len() as f64 / self.config.failure_queue_capacity as f64;
        crate::observability::set_write_failure_queue_occupancy(occupancy);
        crate::observability::set_circuit_open(occupancy > 0.7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct FakeBackend {
        tokens: Arc<AtomicUsize>,
        trades: Arc<AtomicUsize>,
        fail_trades: bool,
    }

    #[async_trait]
    impl StorageBackend for FakeBackend {
        async fn upsert_token(&self, _row: TokenRow) -> Result<(), CoreError> {
            self.tokens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn insert_trade(&self, _row: TradeRow) -> Result<(), CoreError> {
            if self.fail_trades {
                return Err(CoreError::StoragePermanent("simulated".into()));
            }
            self.trades.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn insert_state_snapshot(&self, _row: StateSnapshotRow) -> Result<(), CoreError> {
            Ok(())
        }
        async fn record_sol_quote(&self, _row: SolQuoteRow) -> Result<(), CoreError> {
            Ok(())
        }
        async fn record_downtime_gap(&self, _row: DowntimeGapRow) -> Result<(), CoreError> {
            Ok(())
        }
        async fn earliest_amm_evidence_slot(&self, _mint: &solana_sdk::pubkey::Pubkey) -> Result<Option<u64>, CoreError> {
            Ok(None)
        }
    }

    fn sample_trade_row() -> TradeRow {
        TradeRow {
            signature: "sig".into(),
            intra_tx_index: 0,
            mint: "mint".into(),
            venue: "bonding_curve".into(),
            direction: "buy".into(),
            trader: None,
            sol_amount: 1,
            token_amount: 1,
            price_sol: Default::default(),
            price_usd: Default::default(),
            market_cap_usd: Default::default(),
            virtual_sol_reserves: 1,
            virtual_token_reserves: 1,
            bonding_curve_progress: None,
            slot: 1,
            block_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn immediate_flush_on_new_token_flag() {
        let backend = FakeBackend::default();
        let (pipeline, flusher) = spawn(backend.clone(), WritePipelineConfig::default());
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(flusher.run(shutdown_rx));

        pipeline.enqueue(WriteOp::Trade(sample_trade_row(), true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.trades.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        drop(pipeline);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn permanent_failure_moves_to_failure_queue_without_stopping() {
        let backend = FakeBackend { fail_trades: true, ..Default::default() };
        let mut config = WritePipelineConfig::default();
        config.retry_budget = 0;
        let (pipeline, flusher) = spawn(backend.clone(), config);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(flusher.run(shutdown_rx));

        pipeline.enqueue(WriteOp::Trade(sample_trade_row(), true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(true).unwrap();
        drop(pipeline);
        let _ = handle.await;
    }
}
