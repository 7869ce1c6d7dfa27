//! Owns the long-lived gRPC connection: connect, send the subscription
//! frame once, forward typed updates, reconnect with backoff on transport
//! failure (spec §4.1).

use super::backoff::BackoffPolicy;
use crate::demux::{RawAccountUpdate, RawSlotUpdate, RawTransactionUpdate};
use crate::error::CoreError;
use crate::gap_recovery::DowntimeGap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use yellowstone_grpc_client::{ClientTlsConfig, GeyserGrpcClient};
use yellowstone_grpc_proto::geyser::{subscribe_update::UpdateOneof, SubscribeRequest, SubscribeUpdate};

/// One typed update handed to the demultiplexer, or a detected stream gap
/// handed to gap recovery.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Account(RawAccountUpdate),
    Transaction(RawTransactionUpdate),
    Slot(RawSlotUpdate),
    Gap(DowntimeGap),
}

/// Bounded queue that drops the oldest entry on overflow instead of
/// blocking the producer (spec §5 Backpressure: "the client drops the
/// oldest buffered update when the downstream queue exceeds a configured
/// high-water mark").
pub struct OverflowQueue<T> {
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> OverflowQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), notify: Notify::new(), capacity, dropped: AtomicU64::new(0) }
    }

    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::observability::record_stream_drop();
        }
        guard.push_back(item);
        drop(guard);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.inner.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    pub endpoint: String,
    pub x_token: Option<String>,
    pub connect_timeout: Duration,
    pub high_water_mark: usize,
    pub backoff: BackoffPolicy,
    /// Approximate wall-clock time per slot, used only to estimate a
    /// recorded gap's duration.
    pub slot_duration: Duration,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:10000".to_string(),
            x_token: None,
            connect_timeout: Duration::from_secs(10),
            high_water_mark: 10_000,
            backoff: BackoffPolicy::default(),
            slot_duration: Duration::from_millis(400),
        }
    }
}

pub struct StreamClient {
    config: StreamClientConfig,
    request: SubscribeRequest,
    queue: Arc<OverflowQueue<StreamEvent>>,
}

impl StreamClient {
    pub fn new(config: StreamClientConfig, request: SubscribeRequest) -> Self {
        let queue = Arc::new(OverflowQueue::new(config.high_water_mark));
        Self { config, request, queue }
    }

    pub fn queue(&self) -> Arc<OverflowQueue<StreamEvent>> {
        self.queue.clone()
    }

    /// Reconnect loop. Returns `Ok(())` on a clean shutdown signal, or
    /// `Err(CoreError::TransportAuth(_))` when authentication itself fails
    /// — that kind is fatal and the composition root exits non-zero
    /// (spec §6 error propagation).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoreError> {
        let mut last_seen_slot: Option<u64> = None;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.connect_and_stream(&mut last_seen_slot, &mut shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "stream disconnected, reconnecting");
                    crate::observability::record_stream_reconnect();
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        last_seen_slot: &mut Option<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        let mut builder = GeyserGrpcClient::build_from_shared(self.config.endpoint.clone())
            .map_err(|e| CoreError::TransportTransient(e.to_string()))?
            .tls_config(ClientTlsConfig::new())
            .map_err(|e| CoreError::TransportTransient(e.to_string()))?;
        if let Some(token) = &self.config.x_token {
            builder = builder.x_token(Some(token.clone())).map_err(|e| CoreError::TransportAuth(e.to_string()))?;
        }
        let mut client = builder.connect().await.map_err(|e| CoreError::TransportTransient(e.to_string()))?;

        let (mut tx, mut stream) = client.subscribe().await.map_err(|e| CoreError::TransportTransient(e.to_string()))?;
        tx.send(self.request.clone()).await.map_err(|e| CoreError::TransportTransient(e.to_string()))?;

        let first_update_recorded = std::cell::Cell::new(false);

        loop {
            tokio::select! {
                maybe_update = stream.next() => {
                    match maybe_update {
                        Some(Ok(update)) => {
                            self.handle_update(update, last_seen_slot, &first_update_recorded);
                        }
                        Some(Err(status)) => {
                            if status.code() == yellowstone_grpc_proto::tonic::Code::Unauthenticated {
                                return Err(CoreError::TransportAuth(status.message().to_string()));
                            }
                            return Err(CoreError::TransportTransient(status.to_string()));
                        }
                        None => return Err(CoreError::TransportTransient("stream closed".to_string())),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_update(&self, update: SubscribeUpdate, last_seen_slot: &mut Option<u64>, first_update_recorded: &std::cell::Cell<bool>) {
        let Some(oneof) = update.update_oneof else {
            return;
        };

        let slot = match &oneof {
            UpdateOneof::Account(a) => a.slot,
            UpdateOneof::Transaction(t) => t.slot,
            UpdateOneof::Slot(s) => s.slot,
            _ => return,
        };

        if !first_update_recorded.get() {
            first_update_recorded.set(true);
            if let Some(last) = *last_seen_slot {
                if let Some(gap) = DowntimeGap::detect(last, slot, self.config.slot_duration) {
                    self.queue.push(StreamEvent::Gap(gap));
                }
            }
        }
        *last_seen_slot = Some((*last_seen_slot).map_or(slot, |prev| prev.max(slot)));

        match oneof {
            UpdateOneof::Account(account_update) => {
                let Some(info) = account_update.account else {
                    tracing::debug!("malformed account update: missing account info");
                    crate::observability::record_malformed_frame();
                    return;
                };
                let (Ok(owner), Ok(pubkey)) = (pubkey_from_bytes(&info.owner), pubkey_from_bytes(&info.pubkey)) else {
                    tracing::debug!("malformed account update: bad pubkey bytes");
                    crate::observability::record_malformed_frame();
                    return;
                };
                self.queue.push(StreamEvent::Account(RawAccountUpdate { owner, pubkey, data: info.data, slot: account_update.slot }));
            }
            UpdateOneof::Transaction(tx_update) => {
                let Some(info) = tx_update.transaction else {
                    tracing::debug!("malformed transaction update: missing transaction info");
                    crate::observability::record_malformed_frame();
                    return;
                };
                let signature = bs58::encode(&info.signature).into_string();
                let log_messages = info.meta.as_ref().map(|m| m.log_messages.clone()).unwrap_or_default();
                let account_keys = info
                    .transaction
                    .as_ref()
                    .and_then(|t| t.message.as_ref())
                    .map(|m| m.account_keys.iter().filter_map(|k| pubkey_from_bytes(k).ok()).collect())
                    .unwrap_or_default();
                self.queue.push(StreamEvent::Transaction(RawTransactionUpdate { signature, account_keys, log_messages, slot: tx_update.slot }));
            }
            UpdateOneof::Slot(slot_update) => {
                self.queue.push(StreamEvent::Slot(RawSlotUpdate { slot: slot_update.slot }));
            }
            _ => {}
        }
    }
}

fn pubkey_from_bytes(bytes: &[u8]) -> Result<Pubkey, CoreError> {
    Pubkey::try_from(bytes).map_err(|_| CoreError::DecodeShort { needed: 32, got: bytes.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_queue_drops_oldest_past_capacity() {
        let queue: OverflowQueue<u32> = OverflowQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.pop().await, 2);
        assert_eq!(queue.pop().await, 3);
    }

    #[test]
    fn pubkey_from_bytes_rejects_short_input() {
        assert!(pubkey_from_bytes(&[0u8; 4]).is_err());
    }
}
