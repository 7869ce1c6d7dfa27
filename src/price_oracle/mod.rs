//! Maintains the single SOL/USD quote PriceCalculator depends on (spec §4.9).
//!
//! The quote is a single-writer cell read by many (spec §5 Shared
//! resources): the poller task is the sole writer, call sites read through
//! a cheap clone of the current value.

use crate::error::CoreError;
use crate::storage::models::SolQuoteRow;
use crate::storage::{WriteOp, WritePipeline};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// A SOL/USD price with a wall-clock timestamp and source tag (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct SolQuote {
    pub price_usd: Decimal,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

/// Fetches a fresh SOL/USD price from an external source. Implemented by
/// `HttpPriceSource` in production and by fixed-sequence fakes in tests.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self) -> Result<Decimal, CoreError>;
    fn name(&self) -> &'static str;
}

/// Fetches a price quote via an HTTP JSON API, matching the `reqwest`
/// ambient-stack precedent used for other outbound API calls.
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait::async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch(&self) -> Result<Decimal, CoreError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CoreError::TransportTransient(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::TransportTransient(e.to_string()))?;
        let price = body
            .get("solana")
            .and_then(|s| s.get("usd"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::TransportTransient("malformed price response".into()))?;
        Decimal::try_from(price).map_err(|e| CoreError::ArithmeticPrecision(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Clone)]
pub struct PriceOracleConfig {
    pub poll_interval: Duration,
    pub staleness_ceiling: Duration,
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(30), staleness_ceiling: Duration::from_secs(300) }
    }
}

/// Polls a `PriceSource` on a fixed cadence and exposes the freshest
/// `SolQuote` to many concurrent readers (spec §4.9).
pub struct SolPriceOracle {
    source: Box<dyn PriceSource>,
    config: PriceOracleConfig,
    current: Arc<RwLock<Option<SolQuote>>>,
    write_pipeline: Option<WritePipeline>,
}

impl SolPriceOracle {
    pub fn new(source: Box<dyn PriceSource>, config: PriceOracleConfig) -> Self {
        Self { source, config, current: Arc::new(RwLock::new(None)), write_pipeline: None }
    }

    /// Persist each successful poll as a [`SolQuoteRow`] via `pipeline`
    /// (spec §3, `sol_price_history`). Without this, the oracle only ever
    /// updates its in-memory cell.
    pub fn with_write_pipeline(mut self, pipeline: WritePipeline) -> Self {
        self.write_pipeline = Some(pipeline);
        self
    }

    /// Read the current quote, erroring if none has ever been fetched or the
    /// most recent one has aged past the ceiling.
    pub fn current_quote(&self) -> Result<SolQuote, CoreError> {
        let guard = self.current.read();
        let quote = guard.as_ref().ok_or_else(|| CoreError::StaleSolQuote {
            age_secs: u64::MAX,
            ceiling_secs: self.config.staleness_ceiling.as_secs(),
        })?;
        let age = (Utc::now() - quote.observed_at).num_seconds().max(0) as u64;
        if age > self.config.staleness_ceiling.as_secs() {
            crate::observability::record_stale_quote_skip();
            return Err(CoreError::StaleSolQuote { age_secs: age, ceiling_secs: self.config.staleness_ceiling.as_secs() });
        }
        Ok(quote.clone())
    }

    /// A cheap handle for sharing the read side with other components
    /// without giving them the poller.
    pub fn reader(&self) -> SolQuoteReader {
        SolQuoteReader { current: self.current.clone(), staleness_ceiling: self.config.staleness_ceiling }
    }

    async fn poll_once(&self) {
        match self.source.fetch().await {
            Ok(price_usd) => {
                let quote = SolQuote { price_usd, source: self.source.name().to_string(), observed_at: Utc::now() };
                if let Some(pipeline) = &self.write_pipeline {
                    let row = SolQuoteRow { price_usd: quote.price_usd, source: quote.source.clone(), observed_at: quote.observed_at };
                    if pipeline.enqueue(WriteOp::SolQuote(row)).await.is_err() {
                        tracing::warn!("failed to enqueue SOL/USD quote for persistence");
                    }
                }
                *self.current.write() = Some(quote);
            }
            Err(e) => {
                tracing::warn!(error = %e, "SOL/USD poll failed, keeping previous quote");
            }
        }
    }

    /// Run the poll loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// A read-only handle to the oracle's current quote, cloned freely across
/// the components that need it (PriceCalculator call sites).
#[derive(Clone)]
pub struct SolQuoteReader {
    current: Arc<RwLock<Option<SolQuote>>>,
    staleness_ceiling: Duration,
}

impl SolQuoteReader {
    pub fn current_quote(&self) -> Result<SolQuote, CoreError> {
        let guard = self.current.read();
        let quote = guard.as_ref().ok_or_else(|| CoreError::StaleSolQuote {
            age_secs: u64::MAX,
            ceiling_secs: self.staleness_ceiling.as_secs(),
        })?;
        let age = (Utc::now() - quote.observed_at).num_seconds().max(0) as u64;
        if age > self.staleness_ceiling.as_secs() {
            crate::observability::record_stale_quote_skip();
            return Err(CoreError::StaleSolQuote { age_secs: age, ceiling_secs: self.staleness_ceiling.as_secs() });
        }
        Ok(quote.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{DowntimeGapRow, StateSnapshotRow, TokenRow, TradeRow};
    use crate::storage::WritePipelineConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every `SolQuoteRow` it receives; every other call is
    /// unreachable from these tests.
    #[derive(Default, Clone)]
    struct RecordingStorage {
        quotes: Arc<Mutex<Vec<SolQuoteRow>>>,
    }

    #[async_trait::async_trait]
    impl crate::storage::StorageBackend for RecordingStorage {
        async fn upsert_token(&self, _row: TokenRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn insert_trade(&self, _row: TradeRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn insert_state_snapshot(&self, _row: StateSnapshotRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn record_sol_quote(&self, row: SolQuoteRow) -> Result<(), CoreError> {
            self.quotes.lock().unwrap().push(row);
            Ok(())
        }
        async fn record_downtime_gap(&self, _row: DowntimeGapRow) -> Result<(), CoreError> {
            unreachable!()
        }
        async fn earliest_amm_evidence_slot(&self, _mint: &solana_sdk::pubkey::Pubkey) -> Result<Option<u64>, CoreError> {
            unreachable!()
        }
    }

    struct SequencedSource {
        calls: AtomicUsize,
        results: Vec<Result<Decimal, ()>>,
    }

    #[async_trait::async_trait]
    impl PriceSource for SequencedSource {
        async fn fetch(&self) -> Result<Decimal, CoreError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results.get(i).cloned() {
                Some(Ok(p)) => Ok(p),
                _ => Err(CoreError::TransportTransient("simulated failure".into())),
            }
        }

        fn name(&self) -> &'static str {
            "sequenced"
        }
    }

    #[test]
    fn no_quote_yet_is_stale() {
        let source = SequencedSource { calls: AtomicUsize::new(0), results: vec![] };
        let oracle = SolPriceOracle::new(Box::new(source), PriceOracleConfig::default());
        assert!(matches!(oracle.current_quote(), Err(CoreError::StaleSolQuote { .. })));
    }

    #[tokio::test]
    async fn poll_failure_keeps_previous_quote() {
        let source = SequencedSource {
            calls: AtomicUsize::new(0),
            results: vec![Ok(Decimal::from(150)), Err(())],
        };
        let oracle = SolPriceOracle::new(Box::new(source), PriceOracleConfig::default());
        oracle.poll_once().await;
        let first = oracle.current_quote().unwrap();
        assert_eq!(first.price_usd, Decimal::from(150));

        oracle.poll_once().await;
        let second = oracle.current_quote().unwrap();
        assert_eq!(second.price_usd, Decimal::from(150), "failed poll must not clobber the last good quote");
    }

    #[tokio::test]
    async fn staleness_ceiling_of_zero_rejects_any_quote_immediately() {
        let source = SequencedSource { calls: AtomicUsize::new(0), results: vec![Ok(Decimal::from(150))] };
        let config = PriceOracleConfig { poll_interval: Duration::from_secs(30), staleness_ceiling: Duration::from_secs(0) };
        let oracle = SolPriceOracle::new(Box::new(source), config);
        oracle.poll_once().await;
        assert!(matches!(oracle.current_quote(), Err(CoreError::StaleSolQuote { .. })));
    }

    #[tokio::test]
    async fn successful_poll_enqueues_a_sol_quote_row() {
        let source = SequencedSource { calls: AtomicUsize::new(0), results: vec![Ok(Decimal::from(150))] };
        let storage = RecordingStorage::default();
        let config = WritePipelineConfig { flush_interval: Duration::from_millis(10), ..WritePipelineConfig::default() };
        let (pipeline, flusher) = crate::storage::spawn(storage.clone(), config);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(flusher.run(shutdown_rx));

        let oracle = SolPriceOracle::new(Box::new(source), PriceOracleConfig::default()).with_write_pipeline(pipeline.clone());
        oracle.poll_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let quotes = storage.quotes.lock().unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price_usd, Decimal::from(150));

        shutdown_tx.send(true).unwrap();
        drop(pipeline);
        let _ = handle.await;
    }
}
