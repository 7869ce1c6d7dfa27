//! Composition root: wires every component from [`AppConfig`] and runs them
//! as a small set of cooperatively scheduled tasks until shutdown (spec §5,
//! §6 CLI/operator surface). No singletons — every component is constructed
//! here and handed the handles it needs explicitly.

use clap::Parser;
use dashmap::DashMap;
use launchstream_core::config::{AppConfig, CliArgs, LogFormat};
use launchstream_core::constants::{AMM_PROGRAM, BONDING_CURVE_PROGRAM};
use launchstream_core::decode::{AccountRecord, Venue};
use launchstream_core::demux::{DemuxOutput, EventDemultiplexer, RawTransactionUpdate};
use launchstream_core::eventbus::EventBus;
use launchstream_core::gap_recovery::{DowntimeGap, GapRecoveryConfig, GapRecoveryCoordinator, HistoricalFetcher};
use launchstream_core::lifecycle::{LifecycleConfig, LifecycleEngine, TradeInput};
use launchstream_core::pricing::PriceCalculator;
use launchstream_core::price_oracle::{HttpPriceSource, PriceOracleConfig, SolPriceOracle};
use launchstream_core::storage::models::{DowntimeGapRow, StateSnapshotRow, TokenRow, TradeRow};
use launchstream_core::storage::{PostgresBackend, WriteOp, WritePipelineConfig};
use launchstream_core::stream::client::StreamEvent;
use launchstream_core::stream::{StreamClient, StreamClientConfig};
use launchstream_core::subscription::{AccountChannel, FilterFactory, SubscriptionBuilder, TransactionChannel};
use launchstream_core::CoreError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_ERROR: u8 = 2;
const TRANSPORT_AUTH_ERROR: u8 = 3;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = match AppConfig::load(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    init_tracing(config.log_format);
    tracing::info!(grpc_endpoint = %config.grpc_endpoint, "starting launchstream ingestor");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if matches!(e, CoreError::TransportAuth(_)) => {
            tracing::error!(error = %e, "fatal authentication failure");
            ExitCode::from(TRANSPORT_AUTH_ERROR)
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(CONFIG_ERROR)
        }
    }
}

/// Correlates a venue account's own address to the mint it governs, so a
/// trade transaction (whose log event carries no mint field) can be
/// resolved against any account snapshot already observed for the same
/// bonding-curve/pool address.
#[derive(Default)]
struct MintIndex {
    by_address: DashMap<Pubkey, Pubkey>,
}

impl MintIndex {
    fn record(&self, address: Pubkey, record: &AccountRecord) {
        let mint = match record {
            AccountRecord::BondingCurve(s) => s.mint,
            AccountRecord::AmmPool(s) => s.base_mint,
        };
        self.by_address.insert(address, mint);
    }

    fn resolve(&self, account_keys: &[Pubkey]) -> Option<Pubkey> {
        account_keys.iter().find_map(|k| self.by_address.get(k).map(|e| *e))
    }
}

struct NoopHistoricalFetcher;

#[async_trait::async_trait]
impl HistoricalFetcher for NoopHistoricalFetcher {
    async fn fetch_since_slot(&self, _program: Pubkey, _from_slot: u64) -> Result<Vec<RawTransactionUpdate>, CoreError> {
        // A full implementation re-opens the same gRPC endpoint with
        // `from_slot` set and collects the replayed transactions; wiring
        // that second connection is left for the operator's deployment
        // layer to provide via a real `HistoricalFetcher`.
        Ok(Vec::new())
    }
}

async fn run(config: AppConfig) -> Result<(), CoreError> {
    let event_bus = EventBus::new();
    let lifecycle_config = LifecycleConfig {
        threshold_usd_bc: Decimal::from_f64(config.threshold_usd_bc).unwrap_or_default(),
        threshold_usd_amm: Decimal::from_f64(config.threshold_usd_amm).unwrap_or_default(),
        ..LifecycleConfig::default()
    };
    let lifecycle = Arc::new(LifecycleEngine::new(lifecycle_config, event_bus.clone()));

    let storage = Arc::new(PostgresBackend::connect(&config.database_url).await?);
    storage.run_migrations().await?;
    let (write_pipeline, flusher) = launchstream_core::storage::spawn(storage.clone(), WritePipelineConfig::default());

    let price_source = HttpPriceSource::new("https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd");
    let oracle = Arc::new(
        SolPriceOracle::new(Box::new(price_source), PriceOracleConfig { poll_interval: config.sol_price_poll_interval, ..PriceOracleConfig::default() })
            .with_write_pipeline(write_pipeline.clone()),
    );
    let quote_reader = oracle.reader();

    let request = SubscriptionBuilder::new()
        .commitment(config.commitment)
        .from_slot(config.from_slot)
        .with_accounts(AccountChannel {
            label: "bonding_curve".into(),
            owners: vec![BONDING_CURVE_PROGRAM.to_string()],
            filters: vec![FilterFactory::data_size_equals(
                launchstream_core::constants::layout::bonding_curve::MIN_LEN as u64,
            )],
            ..Default::default()
        })
        .with_accounts(AccountChannel {
            label: "amm_pool".into(),
            owners: vec![AMM_PROGRAM.to_string()],
            ..Default::default()
        })
        .with_transactions(TransactionChannel {
            label: "bonding_curve_txns".into(),
            account_include: vec![BONDING_CURVE_PROGRAM.to_string()],
            ..Default::default()
        })
        .with_transactions(TransactionChannel {
            label: "amm_txns".into(),
            account_include: vec![AMM_PROGRAM.to_string()],
            ..Default::default()
        })
        .with_slot_updates()
        .build()?;

    let stream_client = StreamClient::new(
        StreamClientConfig { endpoint: config.grpc_endpoint.clone(), x_token: config.grpc_x_token.clone(), ..StreamClientConfig::default() },
        request,
    );
    let queue = stream_client.queue();

    if let Ok(addr) = config.metrics_addr.parse() {
        if let Err(e) = launchstream_core::observability::install_recorder(addr) {
            tracing::warn!(error = %e, "failed to install metrics recorder");
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let stream_handle = tokio::spawn(stream_client.run(shutdown_rx.clone()));
    let oracle_handle = tokio::spawn(oracle.clone().run(shutdown_rx.clone()));
    let flusher_handle = tokio::spawn(flusher.run(shutdown_rx.clone()));

    let highest_slot = Arc::new(AtomicU64::new(0));
    let reconciliation_handle = {
        let lifecycle = lifecycle.clone();
        let storage = storage.clone();
        let highest_slot = highest_slot.clone();
        tokio::spawn(reconciliation_sweep_task(lifecycle, storage, highest_slot, shutdown_rx.clone()))
    };

    let pump_handle = tokio::spawn(pump_loop(
        queue,
        lifecycle.clone(),
        quote_reader,
        write_pipeline,
        highest_slot,
        shutdown_rx.clone(),
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = stream_handle.await;
        let _ = oracle_handle.await;
        let _ = flusher_handle.await;
        let _ = reconciliation_handle.await;
        let _ = pump_handle.await;
    })
    .await;

    Ok(())
}

/// Runs the reconciliation sweep on a fixed interval; kept separate from
/// [`gap_recovery::GapRecoveryCoordinator`], which is driven reactively by
/// gap events observed on the stream.
async fn reconciliation_sweep_task(
    lifecycle: Arc<LifecycleEngine>,
    storage: Arc<PostgresBackend>,
    highest_slot: Arc<AtomicU64>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let slot_fn = move || highest_slot.load(Ordering::Relaxed);
    launchstream_core::lifecycle::reconciliation::run(lifecycle, storage, slot_fn, Duration::from_secs(60), shutdown).await;
}

/// Drains the stream's overflow queue: demultiplexes, decodes, prices, feeds
/// the lifecycle engine, and forwards durable rows to the write pipeline.
async fn pump_loop(
    queue: Arc<launchstream_core::stream::OverflowQueue<StreamEvent>>,
    lifecycle: Arc<LifecycleEngine>,
    quote_reader: launchstream_core::price_oracle::SolQuoteReader,
    write_pipeline: launchstream_core::storage::WritePipeline,
    highest_slot: Arc<AtomicU64>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let demux = EventDemultiplexer::new(BONDING_CURVE_PROGRAM, AMM_PROGRAM);
    let mint_index = MintIndex::default();
    let gap_coordinator = GapRecoveryCoordinator::new(GapRecoveryConfig::default(), NoopHistoricalFetcher, vec![BONDING_CURVE_PROGRAM, AMM_PROGRAM]);

    loop {
        let event = tokio::select! {
            e = queue.pop() => e,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        match event {
            StreamEvent::Slot(s) => {
                highest_slot.fetch_max(s.slot, Ordering::Relaxed);
            }
            StreamEvent::Gap(gap) => {
                handle_gap(gap, &gap_coordinator, &demux, &mint_index, &lifecycle, &quote_reader, &write_pipeline).await;
            }
            StreamEvent::Account(update) => {
                if let Some(out) = demux.route_account(&update) {
                    handle_account_output(out, update.pubkey, &mint_index, &write_pipeline).await;
                }
            }
            StreamEvent::Transaction(update) => {
                if let Some(mint) = mint_index.resolve(&update.account_keys) {
                    for out in demux.route_transaction(&update) {
                        handle_trade_output(out, mint, update.signature.clone(), &lifecycle, &quote_reader, &write_pipeline)
                            .await;
                    }
                } else {
                    tracing::debug!(signature = %update.signature, "trade transaction seen before its venue account, mint unresolved");
                }
            }
        }
    }
}

async fn handle_account_output(
    out: DemuxOutput,
    address: Pubkey,
    mint_index: &MintIndex,
    write_pipeline: &launchstream_core::storage::WritePipeline,
) {
    let DemuxOutput::Account { venue, slot, result } = out else { return };
    match result {
        Ok(record) => {
            mint_index.record(address, &record);
            launchstream_core::observability::record_parse_success(venue);
            if let Some(row) = state_snapshot_row(venue, slot, &record) {
                let _ = write_pipeline.enqueue(WriteOp::StateSnapshot(row)).await;
            }
        }
        Err(e) => {
            launchstream_core::observability::record_parse_failure(venue);
            tracing::debug!(error = %e, "account decode failed");
        }
    }
}

fn state_snapshot_row(venue: Venue, slot: u64, record: &AccountRecord) -> Option<StateSnapshotRow> {
    let row = match record {
        AccountRecord::BondingCurve(s) => StateSnapshotRow {
            mint: s.mint.to_string(),
            venue: venue.as_str().to_string(),
            virtual_sol_reserves: s.virtual_sol_reserves as i64,
            virtual_token_reserves: s.virtual_token_reserves as i64,
            real_sol_reserves: Some(s.real_sol_reserves as i64),
            real_token_reserves: Some(s.real_token_reserves as i64),
            complete: Some(s.complete),
            lp_supply: None,
            slot: slot as i64,
            created_at: chrono::Utc::now(),
        },
        AccountRecord::AmmPool(p) => StateSnapshotRow {
            mint: p.base_mint.to_string(),
            venue: venue.as_str().to_string(),
            virtual_sol_reserves: p.quote_reserves as i64,
            virtual_token_reserves: p.base_reserves as i64,
            real_sol_reserves: None,
            real_token_reserves: None,
            complete: None,
            lp_supply: None,
            slot: slot as i64,
            created_at: chrono::Utc::now(),
        },
    };
    Some(row)
}

async fn handle_trade_output(
    out: DemuxOutput,
    mint: Pubkey,
    signature: String,
    lifecycle: &LifecycleEngine,
    quote_reader: &launchstream_core::price_oracle::SolQuoteReader,
    write_pipeline: &launchstream_core::storage::WritePipeline,
) {
    let DemuxOutput::Trade { venue, slot, result, .. } = out else { return };
    let record = match result {
        Ok(r) => {
            launchstream_core::observability::record_parse_success(venue);
            r
        }
        Err(e) => {
            launchstream_core::observability::record_parse_failure(venue);
            tracing::debug!(error = %e, "trade decode failed");
            return;
        }
    };

    let quote = match quote_reader.current_quote() {
        Ok(q) => q,
        Err(e) => {
            tracing::debug!(error = %e, "skipping trade, stale SOL quote");
            return;
        }
    };

    let price = match PriceCalculator::compute(
        record.post_trade_virtual_sol_reserves,
        record.post_trade_virtual_token_reserves,
        venue,
        quote.price_usd,
    ) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "price calculation failed");
            return;
        }
    };

    let progress = matches!(venue, Venue::BondingCurve)
        .then(|| PriceCalculator::bonding_curve_progress(record.post_trade_virtual_sol_reserves));

    let input = TradeInput {
        mint,
        venue,
        direction: record.direction,
        trader: None,
        signature,
        intra_tx_index: 0,
        slot,
        block_time: chrono::Utc::now(),
        sol_amount: record.sol_amount,
        token_amount: record.token_amount,
        virtual_sol_reserves: record.post_trade_virtual_sol_reserves,
        virtual_token_reserves: record.post_trade_virtual_token_reserves,
        price,
        bonding_curve_progress: progress,
    };

    for event in lifecycle.ingest_trade(input) {
        dispatch_event(event, write_pipeline).await;
    }
}

async fn dispatch_event(event: launchstream_core::eventbus::Event, write_pipeline: &launchstream_core::storage::WritePipeline) {
    use launchstream_core::eventbus::Event;
    match event {
        Event::NewToken(token) => {
            launchstream_core::observability::record_tokens_persisted();
            let _ = write_pipeline.enqueue(WriteOp::Token(TokenRow::from(&token), true)).await;
        }
        Event::Trade(trade) => {
            let is_graduation_adjacent = trade.venue == Venue::AmmPool;
            let _ = write_pipeline.enqueue(WriteOp::Trade(TradeRow::from(&trade), is_graduation_adjacent)).await;
        }
        Event::Graduation { .. } => {}
        Event::StatsTick(_) => {}
    }
}

async fn handle_gap(
    gap: DowntimeGap,
    coordinator: &GapRecoveryCoordinator<NoopHistoricalFetcher>,
    demux: &EventDemultiplexer,
    mint_index: &MintIndex,
    lifecycle: &LifecycleEngine,
    quote_reader: &launchstream_core::price_oracle::SolQuoteReader,
    write_pipeline: &launchstream_core::storage::WritePipeline,
) {
    tracing::warn!(start = gap.start_slot, end = gap.end_slot, "stream gap detected");
    let (gap, recovered) = coordinator.recover(gap).await;
    let _ = write_pipeline
        .enqueue(WriteOp::DowntimeGap(DowntimeGapRow {
            start_slot: gap.start_slot as i64,
            end_slot: gap.end_slot as i64,
            duration_secs: gap.duration.as_secs() as i64,
            estimated_missed_trades: gap.estimated_missed_trades.map(|n| n as i64),
            recovery_attempted: gap.recovery_attempted,
        }))
        .await;

    for tx in recovered {
        if let Some(mint) = mint_index.resolve(&tx.account_keys) {
            for out in demux.route_transaction(&tx) {
                handle_trade_output(out, mint, tx.signature.clone(), lifecycle, quote_reader, write_pipeline).await;
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
